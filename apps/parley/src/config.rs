//! Environment-backed runtime configuration for `parley`.

use std::{env, time::Duration};

use session_core::{EchoMode, InboundPolicy, ProtocolErrorSeverity, SessionConfig};
use thiserror::Error;

const DEFAULT_ROSTER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime configuration used by the terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on a roster refresh; the session loop waits at most this long.
    pub roster_timeout: Duration,
    /// Bound on login and resource binding.
    pub connect_timeout: Duration,
    /// Whether inbound chat is echoed back to its sender.
    pub echo_mode: EchoMode,
    /// Whether server-reported stanza errors end the session.
    pub protocol_error_severity: ProtocolErrorSeverity,
    /// Capacity of the session event broadcast.
    pub event_buffer: usize,
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let roster_timeout_secs = parse_optional_u64_with_default(
            "PARLEY_ROSTER_TIMEOUT_SECS",
            DEFAULT_ROSTER_TIMEOUT_SECS,
            &mut lookup,
        )?;
        let connect_timeout_secs = parse_optional_u64_with_default(
            "PARLEY_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
            &mut lookup,
        )?;
        let event_buffer =
            parse_optional_usize("PARLEY_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        let echo_mode = match optional_trimmed_env("PARLEY_ECHO_MODE", &mut lookup) {
            None => EchoMode::default(),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "enabled" => EchoMode::Enabled,
                "disabled" => EchoMode::Disabled,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "PARLEY_ECHO_MODE",
                        value,
                        reason: "expected 'enabled' or 'disabled'".to_owned(),
                    });
                }
            },
        };

        let protocol_error_severity =
            match optional_trimmed_env("PARLEY_PROTOCOL_ERROR_SEVERITY", &mut lookup) {
                None => ProtocolErrorSeverity::default(),
                Some(value) => match value.to_ascii_lowercase().as_str() {
                    "report" => ProtocolErrorSeverity::Report,
                    "fatal" => ProtocolErrorSeverity::Fatal,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            key: "PARLEY_PROTOCOL_ERROR_SEVERITY",
                            value,
                            reason: "expected 'report' or 'fatal'".to_owned(),
                        });
                    }
                },
            };

        if roster_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PARLEY_ROSTER_TIMEOUT_SECS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PARLEY_CONNECT_TIMEOUT_SECS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PARLEY_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            roster_timeout: Duration::from_secs(roster_timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            echo_mode,
            protocol_error_severity,
            event_buffer,
        })
    }

    /// Session tuning handed to the dispatcher and inbound handler.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            roster_timeout: self.roster_timeout,
            event_buffer: self.event_buffer,
            inbound: InboundPolicy {
                echo_mode: self.echo_mode,
                protocol_error_severity: self.protocol_error_severity,
            },
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(parse_optional_u64(key, lookup)?.unwrap_or(default))
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
