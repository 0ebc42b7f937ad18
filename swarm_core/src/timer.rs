//! Timers: one-shot and periodic callbacks owned by a model.
//!
//! A timer lives in the scheduler's kernel; models hold a copyable [`Timer`]
//! handle. Rescheduling bumps the timer's generation so any entry already in
//! the event queue for an older arming is discarded when it surfaces.

use crate::error::SimError;
use crate::model::Model;
use crate::scheduler::ModelContext;
use std::rc::Rc;
use swarm_env::{ModelId, SimDuration, SimTime};

/// Kernel-wide timer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Handle to a timer created through [`ModelContext::create_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer {
    id: TimerId,
}

impl Timer {
    pub(crate) fn new(id: TimerId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Rearms the timer to fire at `base + delay`, then every `period`
    /// (zero period means one-shot). Any pending firing is discarded.
    pub fn reset(
        &self,
        ctx: &mut ModelContext<'_>,
        base: SimTime,
        delay: SimDuration,
        period: SimDuration,
    ) -> Result<(), SimError> {
        ctx.reset_timer(*self, base, delay, period)
    }

    /// Stops all future firings. Cancelling an inactive timer is a no-op.
    pub fn cancel(&self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
        ctx.cancel_timer(*self)
    }

    /// Next scheduled firing, or `None` if the timer is inactive.
    pub fn next_firing_time(&self, ctx: &ModelContext<'_>) -> Option<SimTime> {
        ctx.next_firing_time(*self)
    }
}

/// Type-erased timer callback. Receives the owning model, the timer handle,
/// and the firing time.
pub(crate) type TimerCallback = Rc<dyn Fn(&mut dyn Model, &mut ModelContext<'_>, Timer, SimTime) -> Result<(), SimError>>;

/// Kernel-side timer state.
pub(crate) struct TimerSlot {
    /// Model the callback runs on
    pub owner: ModelId,

    /// Repeat interval; zero for one-shot
    pub period: SimDuration,

    /// `None` while inactive
    pub next_fire: Option<SimTime>,

    /// Incremented on every (re)arm and cancel
    pub generation: u64,

    pub callback: TimerCallback,
}

impl TimerSlot {
    /// Returns true if a queue entry with `generation` for `time` is current.
    pub fn is_live(&self, generation: u64, time: SimTime) -> bool {
        self.generation == generation && self.next_fire == Some(time)
    }
}
