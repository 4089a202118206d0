use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    error::SessionError,
    state::SessionState,
    transport::Transport,
    types::{ContactId, RosterQueryResult},
};

/// Roster query bound used when none is configured.
pub const DEFAULT_ROSTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues bounded roster queries and applies their results.
///
/// Callers must not run two fetches at once; the dispatcher guarantees this by
/// only fetching from inside its serialized loop.
#[derive(Debug, Clone, Copy)]
pub struct RosterFetcher {
    timeout: Duration,
}

impl RosterFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one query. Never retries; expiry resolves as `Failure`.
    pub async fn fetch<T>(&self, transport: &T) -> RosterQueryResult
    where
        T: Transport + ?Sized,
    {
        debug!(timeout_secs = self.timeout.as_secs(), "querying roster");
        match tokio::time::timeout(self.timeout, transport.query_roster(self.timeout)).await {
            Ok(Ok(items)) => RosterQueryResult::Success { items },
            Ok(Err(err)) if err.code == "roster_timeout" => RosterQueryResult::Failure { reason: err },
            Ok(Err(err)) => RosterQueryResult::Failure {
                reason: SessionError::roster_query_failed(err.message),
            },
            Err(_) => RosterQueryResult::Failure {
                reason: SessionError::roster_timeout(self.timeout),
            },
        }
    }

    /// Fetch and apply in one step, returning the new contact list.
    pub async fn refresh<'s, T>(
        &self,
        transport: &T,
        state: &'s mut SessionState,
    ) -> Result<&'s [ContactId], SessionError>
    where
        T: Transport + ?Sized,
    {
        let result = self.fetch(transport).await;
        apply_roster_result(result, state)?;
        Ok(state.contacts())
    }
}

impl Default for RosterFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_ROSTER_TIMEOUT)
    }
}

/// Full replace on success; on failure the contact list is left unchanged.
pub fn apply_roster_result(
    result: RosterQueryResult,
    state: &mut SessionState,
) -> Result<(), SessionError> {
    match result {
        RosterQueryResult::Success { items } => {
            state.replace_contacts(items);
            Ok(())
        }
        RosterQueryResult::Failure { reason } => {
            warn!(code = %reason.code, error = %reason.message, "roster refresh failed");
            Err(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingTransport, RosterReply, ids};

    #[tokio::test]
    async fn success_replaces_contacts_instead_of_appending() {
        let transport = RecordingTransport::new()
            .with_roster(RosterReply::Items(ids(&["A", "B", "C"])));
        let mut state = SessionState::new();
        state.replace_contacts(ids(&["X", "Y"]));

        let contacts = RosterFetcher::default()
            .refresh(&transport, &mut state)
            .await
            .expect("refresh should succeed");

        assert_eq!(contacts, ids(&["A", "B", "C"]).as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_contacts_unchanged() {
        let transport = RecordingTransport::new().with_roster(RosterReply::Hang);
        let mut state = SessionState::new();
        state.replace_contacts(ids(&["X", "Y"]));

        let err = RosterFetcher::new(Duration::from_secs(30))
            .refresh(&transport, &mut state)
            .await
            .expect_err("hanging query must time out");

        assert_eq!(err.code, "roster_timeout");
        assert_eq!(state.contacts(), ids(&["X", "Y"]).as_slice());
    }

    #[tokio::test]
    async fn transport_failure_is_reported_as_query_failure() {
        let transport = RecordingTransport::new().with_roster(RosterReply::Fail(
            SessionError::send_failed("connection reset"),
        ));

        let result = RosterFetcher::default().fetch(&transport).await;

        match result {
            RosterQueryResult::Failure { reason } => {
                assert_eq!(reason.code, "roster_query_failed");
                assert!(!reason.is_session_ending());
                assert!(reason.message.contains("connection reset"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_issues_exactly_one_query() {
        let transport =
            RecordingTransport::new().with_roster(RosterReply::Fail(SessionError::roster_timeout(
                DEFAULT_ROSTER_TIMEOUT,
            )));

        let _ = RosterFetcher::default().fetch(&transport).await;

        assert_eq!(transport.roster_queries(), 1);
    }
}
