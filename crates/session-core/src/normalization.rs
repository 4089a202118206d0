use crate::{
    error::SessionError,
    types::{ContactId, SessionEvent},
};

/// Internal helper describing send success/failure before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the message.
    Delivered { to: ContactId, body: String },
    /// The message was not sent.
    Failed { error: SessionError },
}

/// Convert a send outcome to the event shown to the user.
pub fn normalize_send_outcome(action: &str, outcome: SendOutcome) -> SessionEvent {
    match outcome {
        SendOutcome::Delivered { to, body } => SessionEvent::ChatSent { to, body },
        SendOutcome::Failed { error } => normalize_action_failure(action, error),
    }
}

/// Convert an action error into a stable `ActionFailed` event.
pub fn normalize_action_failure(action: &str, error: SessionError) -> SessionEvent {
    SessionEvent::ActionFailed {
        action: action.to_owned(),
        code: error.code,
        message: error.message,
    }
}
