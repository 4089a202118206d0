use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{Action, SessionEvent};

/// Broadcast event stream type used by display subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Errors returned by session channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionChannelError {
    /// The dispatcher has terminated and no longer accepts actions.
    #[error("action queue is closed")]
    ActionQueueClosed,
}

/// Producer-side handle: action queue sender plus event fan-out.
///
/// The action queue is unbounded so that enqueueing never blocks, which lets
/// the transport's inbound delivery path produce actions safely.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    action_tx: mpsc::UnboundedSender<Action>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Create a new channel set and return it with the action receiver.
    pub fn new(event_buffer: usize) -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                action_tx,
                event_tx,
            },
            action_rx,
        )
    }

    /// Clone the event sender.
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Enqueue one action for the dispatcher. Never blocks.
    pub fn send_action(&self, action: Action) -> Result<(), SessionChannelError> {
        self.action_tx
            .send(action)
            .map_err(|_| SessionChannelError::ActionQueueClosed)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
