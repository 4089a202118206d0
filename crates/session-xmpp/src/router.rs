//! Routing of received stanzas: query replies go back to their callers,
//! message stanzas go to the inbound handler, and server requests are
//! answered.

use std::collections::HashMap;

use session_core::{InboundHandler, SessionError};
use tokio::sync::oneshot;
use tracing::{debug, trace};
use xmpp_parsers::{Element, iq::Iq};

use crate::stanza::{CLIENT_NS, parse_message, unhandled_iq_reply};

pub(crate) type QueryReply = oneshot::Sender<Result<Element, SessionError>>;

pub(crate) struct StanzaRouter {
    pending_queries: HashMap<String, QueryReply>,
    handler: InboundHandler,
}

impl StanzaRouter {
    pub(crate) fn new(handler: InboundHandler) -> Self {
        Self {
            pending_queries: HashMap::new(),
            handler,
        }
    }

    pub(crate) fn handler(&self) -> &InboundHandler {
        &self.handler
    }

    pub(crate) fn pending_queries(&self) -> usize {
        self.pending_queries.len()
    }

    /// Wait for the reply to the iq sent with `id`.
    ///
    /// Entries whose caller already gave up (timed out) are evicted first.
    pub(crate) fn track(&mut self, id: String, reply: QueryReply) {
        self.pending_queries.retain(|_, pending| !pending.is_closed());
        self.pending_queries.insert(id, reply);
    }

    /// Route one received stanza. Returns a stanza to send back, if any.
    pub(crate) fn route(&mut self, element: Element) -> Option<Element> {
        if element.is("iq", CLIENT_NS) {
            return self.route_iq(element);
        }

        match parse_message(&element) {
            Some(stanza) => {
                self.handler.handle(stanza);
            }
            None => trace!(name = element.name(), "ignoring non-message stanza"),
        }
        None
    }

    fn route_iq(&mut self, element: Element) -> Option<Element> {
        match element.attr("type") {
            Some("result") | Some("error") => {
                let id = element.attr("id").unwrap_or_default().to_owned();
                match self.pending_queries.remove(&id) {
                    Some(reply) => {
                        if reply.send(Ok(element)).is_err() {
                            debug!(id, "query reply arrived after its caller gave up");
                        }
                    }
                    None => trace!(id, "ignoring unsolicited iq response"),
                }
                None
            }
            _ => match Iq::try_from(element) {
                Ok(iq) => {
                    debug!(id = %iq.id, "answering server request");
                    unhandled_iq_reply(&iq)
                }
                Err(err) => {
                    debug!(error = %err, "dropping malformed iq");
                    None
                }
            },
        }
    }
}
