use crate::{
    error::SessionError,
    types::{SessionEvent, SessionLifecycleState},
};

#[derive(Debug, Clone)]
pub struct DispatcherStateMachine {
    state: SessionLifecycleState,
}

impl Default for DispatcherStateMachine {
    fn default() -> Self {
        Self {
            state: SessionLifecycleState::Running,
        }
    }
}

impl DispatcherStateMachine {
    pub fn state(&self) -> SessionLifecycleState {
        self.state
    }

    pub fn begin_shutdown(&mut self) -> Result<SessionEvent, SessionError> {
        self.transition_from_state(
            SessionLifecycleState::Running,
            SessionLifecycleState::Draining,
            "shutdown",
        )
    }

    pub fn finish_shutdown(&mut self) -> Result<SessionEvent, SessionError> {
        self.transition_from_state(
            SessionLifecycleState::Draining,
            SessionLifecycleState::Terminated,
            "disconnect_complete",
        )
    }

    fn transition_from_state(
        &mut self,
        expected: SessionLifecycleState,
        next: SessionLifecycleState,
        action: &str,
    ) -> Result<SessionEvent, SessionError> {
        if self.state != expected {
            return Err(SessionError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(SessionEvent::StateChanged { state: next })
    }
}
