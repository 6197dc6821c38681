use crate::error::{Result, SynthesisError};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Proof of a successful `acquire`; releasing by lease ignores stale holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease(u64);

#[derive(Debug, Default)]
struct GuardState {
    held: bool,
    generation: u64,
}

/// Allows at most one synthesis request per synthesizer at a time
#[derive(Debug, Default)]
pub struct UsageGuard {
    state: Mutex<GuardState>,
}

impl UsageGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self) -> Result<Lease> {
        let mut state = self.lock();
        if state.held {
            return Err(SynthesisError::AlreadyInUse);
        }
        state.held = true;
        state.generation += 1;
        Ok(Lease(state.generation))
    }

    /// Clear the flag whoever holds it
    pub fn release(&self) {
        self.lock().held = false;
    }

    /// Clear the flag only if `lease` is still the current holder
    pub fn release_lease(&self, lease: Lease) -> bool {
        let mut state = self.lock();
        if state.held && state.generation == lease.0 {
            state.held = false;
            true
        } else {
            false
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock().held
    }
}
