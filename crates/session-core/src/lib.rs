//! Session core for the parley chat client.
//!
//! This crate owns the single-consumer action loop that serializes outbound
//! work against one transport connection, the session state it mutates, and
//! the classification of inbound stanzas. Connection handling and wire
//! encoding live behind the [`Transport`] trait.

/// Action queue and event fan-out primitives.
pub mod channel;
/// The action dispatcher loop and its producer handle.
pub mod dispatcher;
/// Stable session error types.
pub mod error;
/// Inbound stanza classification and reactions.
pub mod inbound;
/// Conversion of action outcomes into display events.
pub mod normalization;
/// Bounded roster queries.
pub mod roster;
/// Contact list and current correspondent.
pub mod state;
/// Dispatcher lifecycle state machine.
pub mod state_machine;
/// Boundary trait implemented by protocol adapters.
pub mod transport;
/// Actions, events and other protocol-neutral types.
pub mod types;

#[cfg(test)]
mod test_support;

pub use channel::{EventStream, SessionChannelError, SessionChannels};
pub use dispatcher::{
    ActionDispatcher, SessionConfig, SessionHandle, SessionReport, spawn_dispatcher,
};
pub use error::{SessionError, SessionErrorCategory};
pub use inbound::{InboundHandler, InboundPolicy, classify};
pub use normalization::{SendOutcome, normalize_action_failure, normalize_send_outcome};
pub use roster::{DEFAULT_ROSTER_TIMEOUT, RosterFetcher, apply_roster_result};
pub use state::SessionState;
pub use state_machine::DispatcherStateMachine;
pub use transport::Transport;
pub use types::{
    Action, ContactId, EchoMode, InboundEvent, InboundStanza, OutgoingChat,
    ProtocolErrorSeverity, RosterQueryResult, SessionEvent, SessionLifecycleState, ShutdownCause,
    StanzaErrorDetail, StanzaKind,
};
