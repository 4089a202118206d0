//! In-memory transport used by the crate's tests.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use async_trait::async_trait;

use crate::{
    error::SessionError,
    transport::Transport,
    types::{ContactId, OutgoingChat},
};

pub fn ids(values: &[&str]) -> Vec<ContactId> {
    values.iter().copied().map(ContactId::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Send(OutgoingChat),
    SendRaw(String),
    QueryRoster,
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum RosterReply {
    Items(Vec<ContactId>),
    Fail(SessionError),
    /// Never resolves; exercises the fetcher's timeout.
    Hang,
}

/// Records every primitive call; replies are scripted up front.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    roster_replies: Mutex<VecDeque<RosterReply>>,
    send_error: Option<SessionError>,
    raw_error: Option<SessionError>,
    disconnect_error: Option<SessionError>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply for the next roster query. Unscripted queries return an empty roster.
    pub fn with_roster(self, reply: RosterReply) -> Self {
        self.roster_replies
            .lock()
            .expect("roster replies lock poisoned")
            .push_back(reply);
        self
    }

    pub fn failing_sends(mut self, error: SessionError) -> Self {
        self.send_error = Some(error);
        self
    }

    pub fn failing_raw_sends(mut self, error: SessionError) -> Self {
        self.raw_error = Some(error);
        self
    }

    pub fn failing_disconnect(mut self, error: SessionError) -> Self {
        self.disconnect_error = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn sent_chats(&self) -> Vec<OutgoingChat> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn roster_queries(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::QueryRoster))
            .count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, message: OutgoingChat) -> Result<(), SessionError> {
        self.record(TransportCall::Send(message));
        match &self.send_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn send_raw(&self, payload: &str) -> Result<(), SessionError> {
        self.record(TransportCall::SendRaw(payload.to_owned()));
        match &self.raw_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn query_roster(&self, _timeout: Duration) -> Result<Vec<ContactId>, SessionError> {
        self.record(TransportCall::QueryRoster);
        let reply = self
            .roster_replies
            .lock()
            .expect("roster replies lock poisoned")
            .pop_front();
        match reply {
            Some(RosterReply::Items(items)) => Ok(items),
            Some(RosterReply::Fail(err)) => Err(err),
            Some(RosterReply::Hang) => std::future::pending().await,
            None => Ok(Vec::new()),
        }
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.record(TransportCall::Disconnect);
        match &self.disconnect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
