//! Boundary to the protocol stack that owns the live connection.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::SessionError,
    types::{ContactId, OutgoingChat},
};

/// Primitives the session core consumes from a connected transport.
///
/// Implementations own the connection exclusively and deliver inbound
/// stanzas to an [`InboundHandler`](crate::inbound::InboundHandler) from their
/// own execution context.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one chat-typed message.
    async fn send(&self, message: OutgoingChat) -> Result<(), SessionError>;

    /// Send a serialized stanza verbatim.
    async fn send_raw(&self, payload: &str) -> Result<(), SessionError>;

    /// Request the server roster, giving up after `timeout`.
    async fn query_roster(&self, timeout: Duration) -> Result<Vec<ContactId>, SessionError>;

    /// Close the session and the underlying connection.
    async fn disconnect(&self) -> Result<(), SessionError>;
}
