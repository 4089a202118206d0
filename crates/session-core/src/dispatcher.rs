//! The session event loop: a single consumer that executes actions one at a
//! time against the transport and the session state it owns.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    channel::{EventStream, SessionChannelError, SessionChannels},
    error::SessionError,
    inbound::{InboundHandler, InboundPolicy},
    normalization::{SendOutcome, normalize_action_failure, normalize_send_outcome},
    roster::{DEFAULT_ROSTER_TIMEOUT, RosterFetcher},
    state::SessionState,
    state_machine::DispatcherStateMachine,
    transport::Transport,
    types::{Action, ContactId, OutgoingChat, SessionEvent, ShutdownCause},
};

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tuning for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on a roster refresh; the loop is blocked for at most this long.
    pub roster_timeout: Duration,
    /// Capacity of the session event broadcast.
    pub event_buffer: usize,
    /// Reactions to inbound chat and stanza errors.
    pub inbound: InboundPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            roster_timeout: DEFAULT_ROSTER_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            inbound: InboundPolicy::default(),
        }
    }
}

/// Producer-side handle shared by the input reader and the inbound handler.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    channels: SessionChannels,
    config: SessionConfig,
}

impl SessionHandle {
    /// Create the handle together with the receiver the dispatcher will own.
    pub fn new(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (channels, action_rx) = SessionChannels::new(config.event_buffer);
        (Self { channels, config }, action_rx)
    }

    pub fn send(&self, action: Action) -> Result<(), SessionChannelError> {
        self.channels.send_action(action)
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Handler to register with the transport's inbound callback.
    pub fn inbound_handler(&self) -> InboundHandler {
        InboundHandler::new(self.channels.clone(), self.config.inbound)
    }

    fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.channels.event_sender()
    }
}

/// Final report returned once the loop terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub cause: ShutdownCause,
    pub final_state: SessionState,
    /// Actions still queued when the session ended; never executed.
    pub discarded_actions: usize,
}

enum Flow {
    Continue,
    Shutdown(ShutdownCause),
}

pub struct ActionDispatcher<T: Transport + ?Sized> {
    transport: Arc<T>,
    action_rx: mpsc::UnboundedReceiver<Action>,
    event_tx: broadcast::Sender<SessionEvent>,
    state: SessionState,
    state_machine: DispatcherStateMachine,
    roster: RosterFetcher,
}

impl<T: Transport + ?Sized> ActionDispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        action_rx: mpsc::UnboundedReceiver<Action>,
        handle: &SessionHandle,
    ) -> Self {
        Self {
            transport,
            action_rx,
            event_tx: handle.event_sender(),
            state: SessionState::new(),
            state_machine: DispatcherStateMachine::default(),
            roster: RosterFetcher::new(handle.config().roster_timeout),
        }
    }

    /// Process actions in arrival order until a shutdown is dequeued or every
    /// producer is gone.
    pub async fn run(mut self) -> SessionReport {
        info!(
            roster_timeout_secs = self.roster.timeout().as_secs(),
            "session dispatcher started"
        );
        let cause = loop {
            let Some(action) = self.action_rx.recv().await else {
                debug!("all action producers dropped");
                break ShutdownCause::ProducersClosed;
            };
            match self.dispatch(action).await {
                Flow::Continue => {}
                Flow::Shutdown(cause) => break cause,
            }
        };
        self.shutdown(cause).await
    }

    async fn dispatch(&mut self, action: Action) -> Flow {
        let kind = action.kind();
        debug!(action = kind, "dispatching action");

        match action {
            Action::SendChat { body } => {
                let Some(to) = self.state.current_contact().cloned() else {
                    warn!("send requested without a correspondent");
                    self.emit(normalize_action_failure(
                        kind,
                        SessionError::no_correspondent_selected(),
                    ));
                    return Flow::Continue;
                };
                self.send_chat(kind, to, body).await
            }
            Action::Reply { to, body } => self.send_chat(kind, to, body).await,
            Action::SendRaw { payload } => match self.transport.send_raw(&payload).await {
                Ok(()) => {
                    debug!(bytes = payload.len(), "raw payload sent");
                    Flow::Continue
                }
                Err(err) => self.on_send_error(kind, err),
            },
            Action::SetCorrespondent { target } => {
                self.state.set_correspondent(target.clone());
                self.emit(SessionEvent::CorrespondentChanged { target });
                Flow::Continue
            }
            Action::RefreshRoster => {
                let roster = self.roster;
                match roster.refresh(&*self.transport, &mut self.state).await {
                    Ok(contacts) => {
                        info!(count = contacts.len(), "roster refreshed");
                        let contacts = contacts.to_vec();
                        self.emit(SessionEvent::RosterUpdated { contacts });
                    }
                    Err(err) => self.emit(normalize_action_failure(kind, err)),
                }
                Flow::Continue
            }
            Action::ListContacts => {
                self.emit(self.state.snapshot());
                Flow::Continue
            }
            Action::Shutdown { cause } => Flow::Shutdown(cause),
        }
    }

    async fn send_chat(&mut self, kind: &str, to: ContactId, body: String) -> Flow {
        let message = OutgoingChat {
            to: to.clone(),
            body: body.clone(),
        };
        match self.transport.send(message).await {
            Ok(()) => {
                debug!(to = %to, action = kind, "chat message sent");
                self.emit(normalize_send_outcome(
                    kind,
                    SendOutcome::Delivered { to, body },
                ));
                Flow::Continue
            }
            Err(err) => self.on_send_error(kind, err),
        }
    }

    fn on_send_error(&mut self, kind: &str, err: SessionError) -> Flow {
        self.emit(normalize_send_outcome(
            kind,
            SendOutcome::Failed { error: err.clone() },
        ));
        if err.is_session_ending() {
            error!(action = kind, error = %err, "send failed; ending session");
            Flow::Shutdown(ShutdownCause::Fatal(err))
        } else {
            warn!(action = kind, error = %err, "send rejected");
            Flow::Continue
        }
    }

    async fn shutdown(mut self, cause: ShutdownCause) -> SessionReport {
        info!(cause = ?cause, "shutting down session");
        match self.state_machine.begin_shutdown() {
            Ok(event) => self.emit(event),
            Err(err) => warn!(error = %err, "unexpected shutdown transition"),
        }

        // Disconnect errors are reported only; the session is ending regardless.
        if let Err(err) = self.transport.disconnect().await {
            warn!(error = %err, "disconnect failed");
            self.emit(normalize_action_failure("shutdown", err));
        }

        match self.state_machine.finish_shutdown() {
            Ok(event) => self.emit(event),
            Err(err) => warn!(error = %err, "unexpected terminate transition"),
        }

        self.action_rx.close();
        let mut discarded_actions = 0;
        while let Ok(action) = self.action_rx.try_recv() {
            debug!(action = action.kind(), "discarding action queued after shutdown");
            discarded_actions += 1;
        }

        self.emit(SessionEvent::SessionEnded {
            cause: cause.clone(),
        });
        info!(
            state = ?self.state_machine.state(),
            discarded_actions,
            "session dispatcher terminated"
        );

        SessionReport {
            cause,
            final_state: self.state,
            discarded_actions,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Spawn the dispatcher loop onto the current tokio runtime.
pub fn spawn_dispatcher<T>(
    transport: Arc<T>,
    action_rx: mpsc::UnboundedReceiver<Action>,
    handle: &SessionHandle,
) -> JoinHandle<SessionReport>
where
    T: Transport + ?Sized + 'static,
{
    let dispatcher = ActionDispatcher::new(transport, action_rx, handle);
    tokio::spawn(dispatcher.run())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        error::SessionErrorCategory,
        test_support::{RecordingTransport, RosterReply, TransportCall, ids},
        types::SessionLifecycleState,
    };

    struct Harness {
        handle: SessionHandle,
        transport: Arc<RecordingTransport>,
        dispatcher: ActionDispatcher<RecordingTransport>,
        events: EventStream,
    }

    fn harness(transport: RecordingTransport) -> Harness {
        let (handle, action_rx) = SessionHandle::new(SessionConfig {
            event_buffer: 64,
            ..SessionConfig::default()
        });
        let transport = Arc::new(transport);
        let events = handle.subscribe();
        let dispatcher = ActionDispatcher::new(Arc::clone(&transport), action_rx, &handle);
        Harness {
            handle,
            transport,
            dispatcher,
            events,
        }
    }

    fn enqueue(handle: &SessionHandle, actions: Vec<Action>) {
        for action in actions {
            handle.send(action).expect("action should enqueue");
        }
    }

    fn drain(events: &mut EventStream) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn set(target: &str) -> Action {
        Action::SetCorrespondent {
            target: ContactId::from(target),
        }
    }

    fn chat(body: &str) -> Action {
        Action::SendChat { body: body.into() }
    }

    fn user_shutdown() -> Action {
        Action::Shutdown {
            cause: ShutdownCause::UserRequested,
        }
    }

    #[tokio::test]
    async fn set_then_send_produces_one_addressed_message() {
        let mut h = harness(RecordingTransport::new());
        enqueue(
            &h.handle,
            vec![set("alice@example.com"), chat("hi"), user_shutdown()],
        );

        let report = h.dispatcher.run().await;

        assert_eq!(
            h.transport.sent_chats(),
            vec![OutgoingChat {
                to: ContactId::from("alice@example.com"),
                body: "hi".into()
            }]
        );
        assert_eq!(
            report.final_state.current_contact(),
            Some(&ContactId::from("alice@example.com"))
        );
        assert_eq!(report.cause, ShutdownCause::UserRequested);
        assert!(drain(&mut h.events).contains(&SessionEvent::ChatSent {
            to: ContactId::from("alice@example.com"),
            body: "hi".into()
        }));
    }

    #[tokio::test]
    async fn send_without_correspondent_reports_and_sends_nothing() {
        let mut h = harness(RecordingTransport::new());
        enqueue(&h.handle, vec![chat("hello?"), Action::ListContacts, user_shutdown()]);

        let report = h.dispatcher.run().await;

        assert!(h.transport.sent_chats().is_empty());
        assert_eq!(report.cause, ShutdownCause::UserRequested);
        let events = drain(&mut h.events);
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::ActionFailed { code, .. } if code == "no_correspondent_selected"
        )));
        // The loop kept going after the failure.
        assert!(events
            .iter()
            .any(|event| matches!(event, SessionEvent::ContactList { .. })));
    }

    #[tokio::test]
    async fn roster_refresh_replaces_previous_contacts() {
        let mut h = harness(
            RecordingTransport::new()
                .with_roster(RosterReply::Items(ids(&["X", "Y"])))
                .with_roster(RosterReply::Items(ids(&["A", "B", "C"]))),
        );
        enqueue(
            &h.handle,
            vec![Action::RefreshRoster, Action::RefreshRoster, user_shutdown()],
        );

        let report = h.dispatcher.run().await;

        assert_eq!(report.final_state.contacts(), ids(&["A", "B", "C"]).as_slice());
        let updates: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::RosterUpdated { contacts } => Some(contacts),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec![ids(&["X", "Y"]), ids(&["A", "B", "C"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn roster_timeout_keeps_contacts_and_bounds_the_stall() {
        let mut h = harness(
            RecordingTransport::new()
                .with_roster(RosterReply::Items(ids(&["X", "Y"])))
                .with_roster(RosterReply::Hang),
        );
        enqueue(
            &h.handle,
            vec![
                Action::RefreshRoster,
                Action::RefreshRoster,
                set("bob@example.com"),
                chat("still here"),
                user_shutdown(),
            ],
        );

        let started = tokio::time::Instant::now();
        let report = h.dispatcher.run().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= DEFAULT_ROSTER_TIMEOUT);
        assert!(elapsed < DEFAULT_ROSTER_TIMEOUT + Duration::from_secs(1));
        assert_eq!(report.final_state.contacts(), ids(&["X", "Y"]).as_slice());
        assert_eq!(h.transport.sent_chats().len(), 1);
        assert!(drain(&mut h.events).iter().any(|event| matches!(
            event,
            SessionEvent::ActionFailed { action, code, .. }
                if action == "refresh_roster" && code == "roster_timeout"
        )));
    }

    #[tokio::test]
    async fn shutdown_is_the_last_action_processed() {
        let h = harness(RecordingTransport::new());
        enqueue(
            &h.handle,
            vec![
                set("alice@example.com"),
                user_shutdown(),
                chat("too late"),
                Action::RefreshRoster,
            ],
        );

        let report = h.dispatcher.run().await;

        assert_eq!(h.transport.calls(), vec![TransportCall::Disconnect]);
        assert_eq!(report.discarded_actions, 2);
        let err = h
            .handle
            .send(chat("after termination"))
            .expect_err("queue must be closed");
        assert_eq!(err, SessionChannelError::ActionQueueClosed);
    }

    #[tokio::test]
    async fn transport_send_failure_ends_the_session() {
        let h = harness(
            RecordingTransport::new().failing_sends(SessionError::send_failed("broken pipe")),
        );
        enqueue(
            &h.handle,
            vec![set("alice@example.com"), chat("one"), chat("two")],
        );

        let report = h.dispatcher.run().await;

        assert_eq!(h.transport.sent_chats().len(), 1);
        assert_eq!(h.transport.calls().last(), Some(&TransportCall::Disconnect));
        assert_eq!(report.discarded_actions, 1);
        match report.cause {
            ShutdownCause::Fatal(err) => assert_eq!(err.code, "send_failed"),
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_raw_payload_does_not_end_the_session() {
        let h = harness(RecordingTransport::new().failing_raw_sends(SessionError::new(
            SessionErrorCategory::Application,
            "invalid_raw_payload",
            "not xml",
        )));
        enqueue(
            &h.handle,
            vec![
                Action::SendRaw {
                    payload: "<presence/".into(),
                },
                set("alice@example.com"),
                chat("after raw"),
                user_shutdown(),
            ],
        );

        let report = h.dispatcher.run().await;

        assert_eq!(report.cause, ShutdownCause::UserRequested);
        assert_eq!(
            h.transport.calls()[0],
            TransportCall::SendRaw("<presence/".into())
        );
        assert_eq!(h.transport.sent_chats().len(), 1);
    }

    #[tokio::test]
    async fn raw_send_failure_from_transport_is_fatal() {
        let h = harness(
            RecordingTransport::new().failing_raw_sends(SessionError::send_failed("reset")),
        );
        enqueue(
            &h.handle,
            vec![
                Action::SendRaw {
                    payload: "<presence xmlns='jabber:client'/>".into(),
                },
                Action::RefreshRoster,
            ],
        );

        let report = h.dispatcher.run().await;

        assert!(matches!(report.cause, ShutdownCause::Fatal(_)));
        assert_eq!(h.transport.roster_queries(), 0);
    }

    #[tokio::test]
    async fn state_is_consistent_between_actions() {
        let mut h = harness(RecordingTransport::new());
        enqueue(
            &h.handle,
            vec![
                set("a@example.com"),
                Action::ListContacts,
                set("b@example.com"),
                Action::ListContacts,
                chat("x"),
                user_shutdown(),
            ],
        );

        h.dispatcher.run().await;

        let observed: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::ContactList { current, .. } => current,
                SessionEvent::ChatSent { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(observed, ids(&["a@example.com", "b@example.com", "b@example.com"]));
    }

    #[tokio::test]
    async fn listing_contacts_twice_is_idempotent() {
        let mut h = harness(
            RecordingTransport::new().with_roster(RosterReply::Items(ids(&["a", "b"]))),
        );
        enqueue(
            &h.handle,
            vec![
                Action::RefreshRoster,
                set("b"),
                Action::ListContacts,
                Action::ListContacts,
                user_shutdown(),
            ],
        );

        h.dispatcher.run().await;

        let lists: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter(|event| matches!(event, SessionEvent::ContactList { .. }))
            .collect();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0], lists[1]);
    }

    #[tokio::test]
    async fn reply_targets_explicit_address_without_changing_correspondent() {
        let h = harness(RecordingTransport::new());
        enqueue(
            &h.handle,
            vec![
                set("alice@example.com"),
                Action::Reply {
                    to: ContactId::from("bob@example.com"),
                    body: "echo".into(),
                },
                user_shutdown(),
            ],
        );

        let report = h.dispatcher.run().await;

        assert_eq!(
            h.transport.sent_chats(),
            vec![OutgoingChat {
                to: ContactId::from("bob@example.com"),
                body: "echo".into()
            }]
        );
        assert_eq!(
            report.final_state.current_contact(),
            Some(&ContactId::from("alice@example.com"))
        );
    }

    #[tokio::test]
    async fn disconnect_failure_still_terminates() {
        let mut h = harness(RecordingTransport::new().failing_disconnect(SessionError::new(
            SessionErrorCategory::Transport,
            "disconnect_failed",
            "already closed",
        )));
        enqueue(&h.handle, vec![user_shutdown()]);

        let report = h.dispatcher.run().await;

        assert_eq!(report.cause, ShutdownCause::UserRequested);
        let events = drain(&mut h.events);
        assert_eq!(
            events.first(),
            Some(&SessionEvent::StateChanged {
                state: SessionLifecycleState::Draining
            })
        );
        assert!(events.contains(&SessionEvent::StateChanged {
            state: SessionLifecycleState::Terminated
        }));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::SessionEnded {
                cause: ShutdownCause::UserRequested
            })
        );
    }

    #[tokio::test]
    async fn dropping_every_producer_ends_the_session() {
        let h = harness(RecordingTransport::new());
        enqueue(&h.handle, vec![set("alice@example.com")]);
        let Harness {
            handle,
            transport,
            dispatcher,
            ..
        } = h;
        drop(handle);

        let report = dispatcher.run().await;

        assert_eq!(report.cause, ShutdownCause::ProducersClosed);
        assert_eq!(transport.calls(), vec![TransportCall::Disconnect]);
    }

    #[tokio::test]
    async fn spawned_dispatcher_serves_concurrent_producers() {
        let (handle, action_rx) = SessionHandle::new(SessionConfig::default());
        let transport = Arc::new(RecordingTransport::new());
        let task = spawn_dispatcher(Arc::clone(&transport), action_rx, &handle);

        let inbound = handle.inbound_handler();
        handle
            .send(set("alice@example.com"))
            .expect("enqueue from input");
        inbound.on_transport_failure(SessionError::new(
            SessionErrorCategory::Transport,
            "transport_closed",
            "stream ended",
        ));

        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("dispatcher should stop")
            .expect("dispatcher task should not panic");

        assert!(matches!(report.cause, ShutdownCause::Fatal(_)));
        assert_eq!(
            report.final_state.current_contact(),
            Some(&ContactId::from("alice@example.com"))
        );
    }
}
