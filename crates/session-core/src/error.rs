use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionLifecycleState;

/// Broad error category deciding whether a failure ends the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionErrorCategory {
    /// Identity parsing, connection or authentication failed before the session started.
    Setup,
    /// The transport could not deliver an outbound stanza or lost the connection.
    Transport,
    /// User-correctable mistake or a non-fatal query failure.
    Application,
    /// Server-reported stanza error.
    Protocol,
    /// Internal invariant break.
    Internal,
}

/// Stable session error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SessionError {
    /// High-level error category.
    pub category: SessionErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl SessionError {
    /// Construct a new session error.
    pub fn new(
        category: SessionErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn no_correspondent_selected() -> Self {
        Self::new(
            SessionErrorCategory::Application,
            "no_correspondent_selected",
            "no correspondent selected; choose a contact first",
        )
    }

    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::new(SessionErrorCategory::Transport, "send_failed", message)
    }

    pub fn roster_timeout(timeout: Duration) -> Self {
        Self::new(
            SessionErrorCategory::Application,
            "roster_timeout",
            format!("roster query timed out after {}s", timeout.as_secs()),
        )
    }

    pub fn roster_query_failed(message: impl Into<String>) -> Self {
        Self::new(
            SessionErrorCategory::Application,
            "roster_query_failed",
            message,
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SessionErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }

    /// Whether this failure must end the session.
    ///
    /// Only transport failures are session-ending; protocol errors are
    /// escalated by the inbound handler's configured severity instead.
    pub fn is_session_ending(&self) -> bool {
        matches!(self.category, SessionErrorCategory::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_end_the_session() {
        assert!(SessionError::send_failed("broken pipe").is_session_ending());
        assert!(!SessionError::no_correspondent_selected().is_session_ending());
        assert!(!SessionError::roster_timeout(Duration::from_secs(30)).is_session_ending());
        assert!(
            !SessionError::new(SessionErrorCategory::Protocol, "stanza_error", "x")
                .is_session_ending()
        );
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = SessionError::invalid_state(SessionLifecycleState::Terminated, "send_chat");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, SessionErrorCategory::Internal);
    }

    #[test]
    fn roster_timeout_message_names_the_bound() {
        let err = SessionError::roster_timeout(Duration::from_secs(30));
        assert_eq!(err.code, "roster_timeout");
        assert!(err.message.contains("30s"));
    }
}
