//! Rendering of session events to the terminal.

use std::fmt::Write as _;

use session_core::{
    ContactId, EventStream, SessionEvent, SessionLifecycleState, ShutdownCause,
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, warn};

/// Text shown for one event, or `None` when the event is not user-facing.
pub fn render_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::StateChanged { state } => {
            debug!(state = ?state, "session state changed");
            match state {
                SessionLifecycleState::Draining => Some("Closing session...".to_owned()),
                SessionLifecycleState::Running | SessionLifecycleState::Terminated => None,
            }
        }
        SessionEvent::ContactList { contacts, current } => {
            Some(render_contact_list(contacts, current.as_ref()))
        }
        SessionEvent::RosterUpdated { contacts } => {
            Some(format!("Contacts refreshed: {} found.", contacts.len()))
        }
        SessionEvent::CorrespondentChanged { target } => {
            Some(format!("Now talking to {target}."))
        }
        SessionEvent::ChatSent { .. } => None,
        SessionEvent::ChatReceived { from, body } => Some(format!("{from} : {body}")),
        SessionEvent::ProtocolError {
            code,
            reason,
            fatal,
        } => {
            let mut line = format!("Server reported error {code}: {reason}");
            if *fatal {
                line.push_str(" (ending session)");
            }
            Some(line)
        }
        SessionEvent::ActionFailed {
            action, message, ..
        } => Some(format!("Could not {}: {message}", action.replace('_', " "))),
        SessionEvent::SessionEnded { cause } => Some(match cause {
            ShutdownCause::UserRequested | ShutdownCause::ProducersClosed => {
                "Goodbye.".to_owned()
            }
            ShutdownCause::Fatal(err) => format!("Session ended: {}", err.message),
        }),
    }
}

/// Contact list with the current correspondent marked.
///
/// Output depends only on the arguments, so listing twice without other
/// actions in between prints the same text.
pub fn render_contact_list(contacts: &[ContactId], current: Option<&ContactId>) -> String {
    let mut out = String::new();
    if contacts.is_empty() {
        out.push_str("No contacts.");
    } else {
        out.push_str("Contacts:");
        for contact in contacts {
            let marker = if Some(contact) == current { '*' } else { ' ' };
            let _ = write!(out, "\n {marker} {contact}");
        }
    }

    match current {
        Some(current) if !contacts.contains(current) => {
            let _ = write!(out, "\nTalking to {current} (not in contacts).");
        }
        Some(_) => {}
        None => out.push_str("\nNo one selected to talk to."),
    }
    out
}

/// Print events to stdout until the session ends or the event channel closes.
pub fn spawn_printer(mut events: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(text) = render_event(&event) {
                        println!("{text}");
                    }
                    if matches!(event, SessionEvent::SessionEnded { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "display fell behind; events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("event printer stopped");
    })
}
