//! ClockControl - freezing simulated time around out-of-band work.
//!
//! A handler that has to block on something slow (a co-simulator, a file
//! exchange) pauses the clock first so no other event is dispatched while the
//! wall clock keeps running. Two styles are supported:
//!
//! - `pause()` / `start()`: a single owner flag. Repeated calls are no-ops.
//! - `hold()`: returns a [`PauseGuard`]; the clock stays frozen while any
//!   guard is alive, so independent pausers cannot resume each other.
//!
//! The clock runs only when the flag is clear *and* no guard is alive.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct ClockState {
    /// Single-owner pause flag
    paused: bool,

    /// Live `PauseGuard`s
    holds: usize,
}

impl ClockState {
    fn is_paused(&self) -> bool {
        self.paused || self.holds > 0
    }
}

/// Process-wide pause/resume control over simulated time advancement.
#[derive(Debug, Default)]
pub struct ClockControl {
    state: Mutex<ClockState>,
    resumed: Condvar,
}

impl ClockControl {
    /// Creates a running clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped clock for sharing between models.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        // The state is two plain counters; a panicking holder cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Freezes simulated time. No-op if already paused.
    pub fn pause(&self) {
        let mut state = self.state();
        if !state.paused {
            state.paused = true;
            tracing::debug!("simulated clock paused");
        }
    }

    /// Resumes simulated time. No-op if already running.
    ///
    /// Outstanding `PauseGuard`s still keep the clock frozen.
    pub fn start(&self) {
        let mut state = self.state();
        if state.paused {
            state.paused = false;
            tracing::debug!("simulated clock started");
            if !state.is_paused() {
                self.resumed.notify_all();
            }
        }
    }

    /// Takes a counted pause that lasts until the returned guard is dropped.
    pub fn hold(self: &Arc<Self>) -> PauseGuard {
        let mut state = self.state();
        state.holds += 1;
        tracing::trace!(holds = state.holds, "simulated clock held");
        PauseGuard {
            clock: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.state();
        state.holds = state.holds.saturating_sub(1);
        if !state.is_paused() {
            self.resumed.notify_all();
        }
    }

    /// Returns true while simulated time is frozen.
    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    /// Number of live `PauseGuard`s.
    pub fn hold_count(&self) -> usize {
        self.state().holds
    }

    /// Blocks the calling thread until the clock runs.
    ///
    /// Returns `false` if `timeout` elapsed first. With `None` this waits
    /// forever: a pauser that never resumes stalls the caller.
    pub fn wait_until_running(&self, timeout: Option<Duration>) -> bool {
        let state = self.state();
        match timeout {
            Some(limit) => {
                let (state, _) = self
                    .resumed
                    .wait_timeout_while(state, limit, |s| s.is_paused())
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                !state.is_paused()
            }
            None => {
                let state = self
                    .resumed
                    .wait_while(state, |s| s.is_paused())
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                !state.is_paused()
            }
        }
    }
}

/// Counted pause on a [`ClockControl`]; resumes on drop.
#[must_use = "the clock resumes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PauseGuard {
    clock: Arc<ClockControl>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.clock.release();
    }
}
