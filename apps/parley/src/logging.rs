//! Tracing/logging bootstrap for the terminal client.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,parley=info,session_core=info,session_xmpp=info";

/// Initialize global tracing subscriber with severity gating from environment.
///
/// Logs go to stderr so they do not interleave with chat output on stdout.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `PARLEY_LOG`
/// 3) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var("PARLEY_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
