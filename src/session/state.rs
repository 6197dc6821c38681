use std::sync::{Mutex, PoisonError};
use strum::Display;

/// Lifecycle of a synthesizer and the request running on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    /// No request running
    Idle,
    Connecting,
    /// Connected; a request may be streaming text
    Active,
    /// End of input sent, remaining audio still arriving
    Draining,
    /// Request cancelled or failed; the connection was discarded
    Terminated,
}

#[derive(Debug)]
pub struct StateCell {
    state: Mutex<SessionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
        }
    }
}

impl StateCell {
    pub fn get(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            log::debug!("🔁 Session state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Move to `next` only when currently in one of `from`
    pub fn transition(&self, from: &[SessionState], next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if from.contains(&state) {
            log::debug!("🔁 Session state {} -> {}", *state, next);
            *state = next;
            true
        } else {
            false
        }
    }
}
