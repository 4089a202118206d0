use serde::{Deserialize, Serialize};
use tracing::{error, info, trace, warn};

use crate::{
    channel::SessionChannels,
    error::{SessionError, SessionErrorCategory},
    types::{
        Action, EchoMode, InboundEvent, InboundStanza, ProtocolErrorSeverity, SessionEvent,
        ShutdownCause, StanzaKind,
    },
};

/// Configurable reactions to inbound traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InboundPolicy {
    pub echo_mode: EchoMode,
    pub protocol_error_severity: ProtocolErrorSeverity,
}

/// Classify a stanza. First matching rule wins:
/// non-chat messages are ignored, then a non-zero error code is a protocol
/// error, then a non-blank body is a chat message.
///
/// Error-typed messages count as chat-type because servers bounce failed chat
/// messages with `type="error"`.
pub fn classify(stanza: &InboundStanza) -> InboundEvent {
    if !matches!(stanza.kind, StanzaKind::Chat | StanzaKind::Error) {
        return InboundEvent::Ignored;
    }

    if let Some(detail) = &stanza.error
        && detail.code != 0
    {
        return InboundEvent::ProtocolError {
            code: detail.code,
            reason: detail.reason.clone(),
        };
    }

    match (&stanza.from, stanza.body.as_deref()) {
        (Some(from), Some(body)) if !body.trim().is_empty() => InboundEvent::ChatReceived {
            from: from.clone(),
            body: body.to_owned(),
        },
        _ => InboundEvent::Ignored,
    }
}

/// Callback target for the transport's inbound delivery context.
///
/// Every method returns without waiting on the dispatcher: output goes to the
/// event broadcast and follow-up actions use the unbounded queue.
#[derive(Debug, Clone)]
pub struct InboundHandler {
    channels: SessionChannels,
    policy: InboundPolicy,
}

impl InboundHandler {
    pub fn new(channels: SessionChannels, policy: InboundPolicy) -> Self {
        Self { channels, policy }
    }

    /// Classify one received stanza and react to it.
    pub fn handle(&self, stanza: InboundStanza) -> InboundEvent {
        let event = classify(&stanza);
        match &event {
            InboundEvent::ChatReceived { from, body } => {
                info!(from = %from, "chat message received");
                self.channels.emit(SessionEvent::ChatReceived {
                    from: from.clone(),
                    body: body.clone(),
                });
                if self.policy.echo_mode == EchoMode::Enabled {
                    self.enqueue(Action::Reply {
                        to: from.clone(),
                        body: body.clone(),
                    });
                }
            }
            InboundEvent::ProtocolError { code, reason } => {
                let fatal = self.policy.protocol_error_severity == ProtocolErrorSeverity::Fatal;
                warn!(code, reason = %reason, fatal, "server reported stanza error");
                self.channels.emit(SessionEvent::ProtocolError {
                    code: *code,
                    reason: reason.clone(),
                    fatal,
                });
                if fatal {
                    self.enqueue(Action::Shutdown {
                        cause: ShutdownCause::Fatal(SessionError::new(
                            SessionErrorCategory::Protocol,
                            "stanza_error",
                            format!("{code}: {reason}"),
                        )),
                    });
                }
            }
            InboundEvent::Ignored => {
                trace!(kind = ?stanza.kind, "ignoring inbound stanza");
            }
        }
        event
    }

    /// Report that the transport lost its connection.
    pub fn on_transport_failure(&self, error: SessionError) {
        error!(code = %error.code, error = %error.message, "transport failure; ending session");
        self.enqueue(Action::Shutdown {
            cause: ShutdownCause::Fatal(error),
        });
    }

    fn enqueue(&self, action: Action) {
        let kind = action.kind();
        if self.channels.send_action(action).is_err() {
            // Dispatcher already terminated; nothing left to act on.
            trace!(action = kind, "dropping inbound follow-up action");
        }
    }
}
