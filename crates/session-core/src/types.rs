use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Opaque contact address as reported by the server or typed by the user.
///
/// Equality is exact string equality. Any normalization belongs to the
/// transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(String);

impl ContactId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContactId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContactId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Dispatcher lifecycle state reported to display consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionLifecycleState {
    /// Dispatcher is accepting and executing actions.
    Running,
    /// A shutdown was dequeued and the transport is being disconnected.
    Draining,
    /// Dispatcher loop has exited. Terminal.
    Terminated,
}

/// Reason a session is shutting down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The user asked to quit.
    UserRequested,
    /// A session-ending error (send failure, connection loss, fatal protocol error).
    Fatal(SessionError),
    /// Every producer handle was dropped without an explicit shutdown.
    ProducersClosed,
}

/// Policy applied to inbound chat messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EchoMode {
    /// Inbound chat is only displayed.
    #[default]
    Disabled,
    /// Inbound chat is displayed and echoed back to its sender.
    Enabled,
}

/// Severity applied to server-reported stanza errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ProtocolErrorSeverity {
    /// Display the error and keep the session running.
    #[default]
    Report,
    /// Display the error and shut the session down.
    Fatal,
}

/// Typed request consumed exactly once by the action dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Action {
    /// Send a chat message to the current correspondent.
    SendChat {
        /// Message body.
        body: String,
    },
    /// Forward a protocol payload verbatim to the transport.
    SendRaw {
        /// Serialized stanza.
        payload: String,
    },
    /// Select the destination for subsequent `SendChat` actions.
    SetCorrespondent {
        /// New correspondent. Not validated against the roster.
        target: ContactId,
    },
    /// Re-fetch the roster, replacing the contact list on success.
    RefreshRoster,
    /// Emit a snapshot of the contact list and current correspondent.
    ListContacts,
    /// Send a chat message to an explicit address (echo replies).
    Reply {
        /// Recipient.
        to: ContactId,
        /// Message body.
        body: String,
    },
    /// Disconnect and stop the dispatcher.
    Shutdown {
        /// Why the session is ending.
        cause: ShutdownCause,
    },
}

impl Action {
    /// Stable short name used in logs and failure events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendChat { .. } => "send_chat",
            Self::SendRaw { .. } => "send_raw",
            Self::SetCorrespondent { .. } => "set_correspondent",
            Self::RefreshRoster => "refresh_roster",
            Self::ListContacts => "list_contacts",
            Self::Reply { .. } => "reply",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

/// Outbound chat message handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingChat {
    pub to: ContactId,
    pub body: String,
}

/// Message stanza type as seen on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StanzaKind {
    Chat,
    Error,
    Normal,
    Groupchat,
    Headline,
}

/// Server-reported error carried by a stanza.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StanzaErrorDetail {
    /// Numeric error code; `0` means no code was reported.
    pub code: u16,
    pub reason: String,
}

/// Transport-neutral view of a received message stanza.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundStanza {
    pub kind: StanzaKind,
    pub from: Option<ContactId>,
    pub body: Option<String>,
    pub error: Option<StanzaErrorDetail>,
}

/// Classification of an inbound stanza.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum InboundEvent {
    ChatReceived { from: ContactId, body: String },
    ProtocolError { code: u16, reason: String },
    Ignored,
}

/// Outcome of one roster query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RosterQueryResult {
    /// Server roster in server-reported order.
    Success { items: Vec<ContactId> },
    /// Query failed or timed out. Contacts stay unchanged.
    Failure { reason: SessionError },
}

/// Output emitted by the dispatcher and inbound handler for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// Dispatcher lifecycle transition.
    StateChanged { state: SessionLifecycleState },
    /// Snapshot answer to `Action::ListContacts`.
    ContactList {
        contacts: Vec<ContactId>,
        current: Option<ContactId>,
    },
    /// Contact list was replaced by a successful roster fetch.
    RosterUpdated { contacts: Vec<ContactId> },
    /// Current correspondent was overwritten.
    CorrespondentChanged { target: ContactId },
    /// Chat message accepted by the transport.
    ChatSent { to: ContactId, body: String },
    /// Chat message received from a contact.
    ChatReceived { from: ContactId, body: String },
    /// Server-reported stanza error.
    ProtocolError {
        code: u16,
        reason: String,
        /// `true` when the configured severity ends the session.
        fatal: bool,
    },
    /// Non-fatal action failure surfaced to the user.
    ActionFailed {
        action: String,
        code: String,
        message: String,
    },
    /// Dispatcher finished; emitted after the final state change.
    SessionEnded { cause: ShutdownCause },
}
