//! The event scheduler: a single-threaded, strictly time-ordered dispatcher.
//!
//! # Dispatch Loop
//!
//! ```text
//! ┌────────────┐   pop earliest    ┌──────────────┐   TypeId    ┌──────────┐
//! │ EventQueue │ ────────────────► │  now = time  │ ──────────► │ handler  │
//! │ (time,seq) │                   └──────────────┘             └────┬─────┘
//! └─────▲──────┘                                                     │
//!       │         schedule_event / timers via ModelContext           │
//!       └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events at equal times are dispatched in the order they were scheduled.
//! Timers share the same queue; reset and cancel bump a generation counter and
//! the stale entries are skipped when they reach the front.

use crate::clock::ClockControl;
use crate::error::SimError;
use crate::model::{ErasedHandler, Model, ModelOptions, ModelRegistry};
use crate::timer::{Timer, TimerCallback, TimerId, TimerSlot};
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any, TypeId};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use swarm_env::{ModelId, ObjectId, SimDuration, SimTime};

/// Scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock limit on waiting for a paused clock. `None` waits forever.
    pub pause_timeout_ms: Option<u64>,
}

impl SchedulerConfig {
    pub fn with_pause_timeout_ms(mut self, ms: u64) -> Self {
        self.pause_timeout_ms = Some(ms);
        self
    }
}

/// A non-fatal problem observed during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Diagnostic {
    /// Target model has no handler for the payload type
    Unhandled {
        target: ModelId,
        time: SimTime,
        payload: &'static str,
    },

    /// A handler or timer callback returned an error
    HandlerFailed {
        target: ModelId,
        time: SimTime,
        error: String,
    },
}

/// Outcome of a single `advance()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// One event or timer fire was processed at this time
    Dispatched(SimTime),

    /// Nothing left to dispatch
    Idle,

    /// The clock is paused; nothing was dispatched
    Paused,
}

/// Totals for one `run_until` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Events and timer fires processed
    pub dispatched: u64,

    /// Simulated time when the run returned
    pub end_time: SimTime,
}

enum Dispatch {
    Event {
        payload: Box<dyn Any>,
        type_id: TypeId,
        type_name: &'static str,
    },
    Timer {
        id: TimerId,
        generation: u64,
    },
}

struct QueueEntry {
    time: SimTime,
    seq: u64,
    target: ModelId,
    dispatch: Dispatch,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Time, queue, and timers. Kept apart from the models so a model can be
/// borrowed mutably while its handler schedules through the kernel.
pub(crate) struct Kernel {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    timers: HashMap<TimerId, TimerSlot>,
    next_timer: u64,
}

impl Kernel {
    fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            timers: HashMap::new(),
            next_timer: 1,
        }
    }

    fn push(&mut self, time: SimTime, target: ModelId, dispatch: Dispatch) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(QueueEntry {
            time,
            seq,
            target,
            dispatch,
        }));
    }

    fn check_not_past(&self, requested: SimTime) -> Result<(), SimError> {
        if requested < self.now {
            return Err(SimError::InvalidSchedule {
                requested,
                now: self.now,
            });
        }
        Ok(())
    }

    fn schedule_event<E: Any>(&mut self, target: ModelId, time: SimTime, payload: E) -> Result<(), SimError> {
        self.check_not_past(time)?;
        self.push(
            time,
            target,
            Dispatch::Event {
                payload: Box::new(payload),
                type_id: TypeId::of::<E>(),
                type_name: type_name::<E>(),
            },
        );
        Ok(())
    }

    /// Points the timer at `at` and queues a matching entry.
    fn arm(&mut self, id: TimerId, at: SimTime) -> Result<(), SimError> {
        let slot = self.timers.get_mut(&id).ok_or(SimError::UnknownTimer(id))?;
        slot.generation += 1;
        slot.next_fire = Some(at);
        let (owner, generation) = (slot.owner, slot.generation);
        self.push(at, owner, Dispatch::Timer { id, generation });
        Ok(())
    }

    fn create_timer(&mut self, owner: ModelId, callback: TimerCallback, delay: SimDuration, period: SimDuration) -> Result<Timer, SimError> {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(
            id,
            TimerSlot {
                owner,
                period,
                next_fire: None,
                generation: 0,
                callback,
            },
        );
        self.arm(id, self.now + delay)?;
        Ok(Timer::new(id))
    }

    fn owned_slot(&mut self, owner: ModelId, id: TimerId) -> Result<&mut TimerSlot, SimError> {
        match self.timers.get_mut(&id) {
            Some(slot) if slot.owner == owner => Ok(slot),
            _ => Err(SimError::UnknownTimer(id)),
        }
    }

    fn reset_timer(
        &mut self,
        owner: ModelId,
        id: TimerId,
        base: SimTime,
        delay: SimDuration,
        period: SimDuration,
    ) -> Result<(), SimError> {
        let at = base + delay;
        self.check_not_past(at)?;
        self.owned_slot(owner, id)?.period = period;
        self.arm(id, at)
    }

    fn cancel_timer(&mut self, owner: ModelId, id: TimerId) -> Result<(), SimError> {
        let slot = self.owned_slot(owner, id)?;
        if slot.next_fire.take().is_some() {
            slot.generation += 1;
        }
        Ok(())
    }

    fn next_firing_time(&self, owner: ModelId, id: TimerId) -> Option<SimTime> {
        self.timers
            .get(&id)
            .filter(|slot| slot.owner == owner)
            .and_then(|slot| slot.next_fire)
    }

    fn is_stale(&self, entry: &QueueEntry) -> bool {
        match entry.dispatch {
            Dispatch::Timer { id, generation } => !self
                .timers
                .get(&id)
                .is_some_and(|slot| slot.is_live(generation, entry.time)),
            Dispatch::Event { .. } => false,
        }
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(top)) = self.queue.peek() {
            if !self.is_stale(top) {
                break;
            }
            self.queue.pop();
        }
    }

    fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_stale();
        self.queue.peek().map(|Reverse(entry)| entry.time)
    }

    fn pop_live(&mut self) -> Option<QueueEntry> {
        self.discard_stale();
        self.queue.pop().map(|Reverse(entry)| entry)
    }

    fn pending(&self) -> usize {
        self.queue
            .iter()
            .filter(|Reverse(entry)| !self.is_stale(entry))
            .count()
    }

    /// Drops every timer and queued entry belonging to `owner`.
    fn forget(&mut self, owner: ModelId) {
        self.timers.retain(|_, slot| slot.owner != owner);
        self.queue.retain(|Reverse(entry)| entry.target != owner);
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.timers.clear();
        self.now = SimTime::ZERO;
    }
}

/// What a handler sees of the simulation while it runs.
///
/// Borrowed from the scheduler for the duration of one dispatch; everything
/// a model wants to happen later goes through here.
pub struct ModelContext<'a> {
    model_id: ModelId,
    kernel: &'a mut Kernel,
    registry: &'a ModelRegistry,
    clock: &'a Arc<ClockControl>,
}

impl<'a> ModelContext<'a> {
    pub(crate) fn new(
        model_id: ModelId,
        kernel: &'a mut Kernel,
        registry: &'a ModelRegistry,
        clock: &'a Arc<ClockControl>,
    ) -> Self {
        Self {
            model_id,
            kernel,
            registry,
            clock,
        }
    }

    /// Id of the model being dispatched.
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.kernel.now
    }

    pub fn registry(&self) -> &ModelRegistry {
        self.registry
    }

    pub fn clock(&self) -> &Arc<ClockControl> {
        self.clock
    }

    /// Physical body of the model being dispatched, if embodied.
    pub fn object(&self) -> Option<ObjectId> {
        self.registry
            .find_model_by_id(self.model_id)
            .and_then(|info| info.object)
    }

    /// Queues `payload` for delivery to `target` at `time`.
    ///
    /// # Errors
    /// * `InvalidSchedule` - `time` is before now
    /// * `UnknownModel` - `target` is not registered
    pub fn schedule_event<E: Any>(&mut self, target: ModelId, time: SimTime, payload: E) -> Result<(), SimError> {
        if self.registry.find_model_by_id(target).is_none() {
            return Err(SimError::UnknownModel(target));
        }
        self.kernel.schedule_event(target, time, payload)
    }

    /// Queues `payload` for `target` at `now + delay`.
    pub fn schedule_in<E: Any>(&mut self, target: ModelId, delay: SimDuration, payload: E) -> Result<(), SimError> {
        let at = self.now() + delay;
        self.schedule_event(target, at, payload)
    }

    /// Creates a timer on the current model.
    ///
    /// The first fire is at `now + delay`; after that every `period`, or never
    /// again if `period` is zero. `M` must be the current model's type; the
    /// callback receives it mutably along with the timer handle and fire time.
    pub fn create_timer<M, F>(&mut self, callback: F, delay: SimDuration, period: SimDuration) -> Result<Timer, SimError>
    where
        M: Model,
        F: Fn(&mut M, &mut ModelContext<'_>, Timer, SimTime) -> Result<(), SimError> + 'static,
    {
        let owner = self.model_id;
        if !self
            .registry
            .find_model_by_id(owner)
            .is_some_and(|info| info.is::<M>())
        {
            return Err(SimError::TypeMismatch {
                model: owner,
                expected: type_name::<M>(),
            });
        }

        let erased: TimerCallback = Rc::new(
            move |model: &mut dyn Model, ctx: &mut ModelContext<'_>, timer: Timer, time: SimTime| {
                let model = model
                    .as_any_mut()
                    .downcast_mut::<M>()
                    .ok_or(SimError::TypeMismatch {
                        model: ctx.model_id(),
                        expected: type_name::<M>(),
                    })?;
                callback(model, ctx, timer, time)
            },
        );
        self.kernel.create_timer(owner, erased, delay, period)
    }

    pub fn reset_timer(&mut self, timer: Timer, base: SimTime, delay: SimDuration, period: SimDuration) -> Result<(), SimError> {
        self.kernel
            .reset_timer(self.model_id, timer.id(), base, delay, period)
    }

    pub fn cancel_timer(&mut self, timer: Timer) -> Result<(), SimError> {
        self.kernel.cancel_timer(self.model_id, timer.id())
    }

    pub fn next_firing_time(&self, timer: Timer) -> Option<SimTime> {
        self.kernel.next_firing_time(self.model_id, timer.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    Running,
    Finished,
}

struct ModelSlot {
    model: Box<dyn Model>,
    handlers: HashMap<TypeId, ErasedHandler>,
}

/// Owns every model and drives simulated time.
pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<ClockControl>,
    registry: ModelRegistry,
    models: HashMap<ModelId, ModelSlot>,
    kernel: Kernel,
    next_model: u64,
    phase: Phase,
    diagnostics: Vec<Diagnostic>,
    dispatched: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            clock: ClockControl::shared(),
            registry: ModelRegistry::new(),
            models: HashMap::new(),
            kernel: Kernel::new(),
            next_model: 1,
            phase: Phase::Building,
            diagnostics: Vec::new(),
            dispatched: 0,
        }
    }

    /// Replaces the clock, e.g. to share one with an external controller.
    pub fn with_clock(mut self, clock: Arc<ClockControl>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<ClockControl> {
        &self.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn now(&self) -> SimTime {
        self.kernel.now
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Total events and timer fires dispatched since construction or restart.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Live entries in the queue (stale timer entries excluded).
    pub fn pending_events(&self) -> usize {
        self.kernel.pending()
    }

    pub fn next_event_time(&mut self) -> Option<SimTime> {
        self.kernel.peek_time()
    }

    /// Registers a model with default options.
    pub fn add_model<M: Model>(&mut self, model: M) -> Result<ModelId, SimError> {
        self.add_model_with(model, ModelOptions::default())
    }

    /// Registers a model. Ids are assigned in order starting at 1.
    ///
    /// A model added after the run started is initialized immediately; if
    /// that fails it is removed again and the error returned.
    pub fn add_model_with<M: Model>(&mut self, model: M, options: ModelOptions) -> Result<ModelId, SimError> {
        if let Some(parent) = options.parent {
            if self.registry.find_model_by_id(parent).is_none() {
                return Err(SimError::UnknownModel(parent));
            }
        }

        let id = ModelId(self.next_model);
        self.next_model += 1;
        let info = self.registry.insert::<M>(id, options);
        tracing::debug!(model = %id, name = %info.name, "model registered");

        self.models.insert(
            id,
            ModelSlot {
                model: Box::new(model),
                handlers: M::handlers().into_erased(),
            },
        );

        if self.phase == Phase::Running {
            if let Err(error) = self.initialize_model(id) {
                tracing::warn!(model = %id, "late model failed to initialize: {}", error);
                self.models.remove(&id);
                self.registry.remove(id);
                self.kernel.forget(id);
                return Err(error);
            }
        }
        Ok(id)
    }

    /// Typed read access to a model's state.
    pub fn model<M: Model>(&self, id: ModelId) -> Option<&M> {
        let model: &dyn Model = &*self.models.get(&id)?.model;
        model.as_any().downcast_ref::<M>()
    }

    /// Typed write access to a model's state, outside dispatch.
    pub fn model_mut<M: Model>(&mut self, id: ModelId) -> Option<&mut M> {
        let model: &mut dyn Model = &mut *self.models.get_mut(&id)?.model;
        model.as_any_mut().downcast_mut::<M>()
    }

    /// Runs `f` on a model with a live context at the current time, as if a
    /// handler were executing. Lets harness code inject sends and timers.
    pub fn invoke<M, R, F>(&mut self, id: ModelId, f: F) -> Result<R, SimError>
    where
        M: Model,
        F: FnOnce(&mut M, &mut ModelContext<'_>) -> R,
    {
        let slot = self.models.get_mut(&id).ok_or(SimError::UnknownModel(id))?;
        let model: &mut dyn Model = &mut *slot.model;
        let model = model
            .as_any_mut()
            .downcast_mut::<M>()
            .ok_or(SimError::TypeMismatch {
                model: id,
                expected: type_name::<M>(),
            })?;
        let mut ctx = ModelContext::new(id, &mut self.kernel, &self.registry, &self.clock);
        Ok(f(model, &mut ctx))
    }

    /// Queues `payload` for `target` at `time` from outside any handler.
    pub fn schedule_event<E: Any>(&mut self, target: ModelId, time: SimTime, payload: E) -> Result<(), SimError> {
        if self.registry.find_model_by_id(target).is_none() {
            return Err(SimError::UnknownModel(target));
        }
        self.kernel.schedule_event(target, time, payload)
    }

    fn initialize_model(&mut self, id: ModelId) -> Result<(), SimError> {
        let slot = self.models.get_mut(&id).ok_or(SimError::UnknownModel(id))?;
        let mut ctx = ModelContext::new(id, &mut self.kernel, &self.registry, &self.clock);
        slot.model.initialize(&mut ctx)
    }

    /// Initializes every model in id order. Later calls are no-ops.
    ///
    /// A model whose `initialize` fails is recorded as a diagnostic and the
    /// rest are still initialized; the first such error is returned.
    pub fn initialize(&mut self) -> Result<(), SimError> {
        if self.phase != Phase::Building {
            return Ok(());
        }
        self.phase = Phase::Running;

        let ids: Vec<ModelId> = self.registry.iter().map(|info| info.id).collect();
        let mut first_failure = None;
        for id in &ids {
            if let Err(error) = self.initialize_model(*id) {
                tracing::warn!(model = %id, "initialize failed: {}", error);
                self.diagnostics.push(Diagnostic::HandlerFailed {
                    target: *id,
                    time: self.kernel.now,
                    error: error.to_string(),
                });
                first_failure.get_or_insert(error);
            }
        }
        tracing::info!(models = ids.len(), pending = self.pending_events(), "simulation initialized");
        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Dispatches the single earliest event.
    pub fn advance(&mut self) -> Result<Advance, SimError> {
        match self.phase {
            Phase::Building => self.initialize()?,
            Phase::Finished => return Ok(Advance::Idle),
            Phase::Running => {}
        }
        if self.clock.is_paused() {
            return Ok(Advance::Paused);
        }
        let Some(entry) = self.kernel.pop_live() else {
            return Ok(Advance::Idle);
        };

        let time = entry.time;
        debug_assert!(time >= self.kernel.now, "event queue went back in time");
        self.kernel.now = time;
        self.dispatched += 1;

        match entry.dispatch {
            Dispatch::Event {
                payload,
                type_id,
                type_name,
            } => self.dispatch_event(entry.target, time, payload, type_id, type_name),
            Dispatch::Timer { id, .. } => self.fire_timer(id, time),
        }
        Ok(Advance::Dispatched(time))
    }

    fn dispatch_event(&mut self, target: ModelId, time: SimTime, payload: Box<dyn Any>, type_id: TypeId, payload_name: &'static str) {
        let Some((slot, handler)) = self
            .models
            .get_mut(&target)
            .and_then(|slot| slot.handlers.get(&type_id).cloned().map(move |handler| (slot, handler)))
        else {
            tracing::warn!(%target, %time, payload = payload_name, "no handler for event, dropping");
            self.diagnostics.push(Diagnostic::Unhandled {
                target,
                time,
                payload: payload_name,
            });
            return;
        };

        let mut ctx = ModelContext::new(target, &mut self.kernel, &self.registry, &self.clock);
        if let Err(error) = handler(&mut *slot.model, &mut ctx, &*payload) {
            self.record_failure(target, time, error);
        }
    }

    fn fire_timer(&mut self, id: TimerId, time: SimTime) {
        let Some(slot) = self.kernel.timers.get_mut(&id) else {
            return;
        };
        let owner = slot.owner;
        let period = slot.period;
        let callback = Rc::clone(&slot.callback);

        if period.is_zero() {
            slot.next_fire = None;
            slot.generation += 1;
        } else if let Err(error) = self.kernel.arm(id, time + period) {
            self.record_failure(owner, time, error);
        }

        let Some(model) = self.models.get_mut(&owner) else {
            return;
        };
        let mut ctx = ModelContext::new(owner, &mut self.kernel, &self.registry, &self.clock);
        if let Err(error) = callback(&mut *model.model, &mut ctx, Timer::new(id), time) {
            self.record_failure(owner, time, error);
        }
    }

    fn record_failure(&mut self, target: ModelId, time: SimTime, error: SimError) {
        tracing::warn!(%target, %time, "handler failed: {}", error);
        self.diagnostics.push(Diagnostic::HandlerFailed {
            target,
            time,
            error: error.to_string(),
        });
    }

    fn wait_for_clock(&self) -> Result<(), SimError> {
        let timeout = self.config.pause_timeout_ms.map(Duration::from_millis);
        if self.clock.wait_until_running(timeout) {
            Ok(())
        } else {
            Err(SimError::PauseTimeout(self.config.pause_timeout_ms.unwrap_or_default()))
        }
    }

    /// Dispatches every event at or before `end`, then moves the clock to
    /// `end`. Blocks while the clock is paused.
    pub fn run_until(&mut self, end: SimTime) -> Result<RunSummary, SimError> {
        self.initialize()?;
        let start = self.dispatched;

        while self.phase == Phase::Running {
            if self.clock.is_paused() {
                self.wait_for_clock()?;
                continue;
            }
            match self.kernel.peek_time() {
                Some(next) if next <= end => {
                    self.advance()?;
                }
                _ => break,
            }
        }

        if self.kernel.now < end {
            self.kernel.now = end;
        }
        Ok(RunSummary {
            dispatched: self.dispatched - start,
            end_time: self.kernel.now,
        })
    }

    /// Runs for `duration` past the current time.
    pub fn run_for(&mut self, duration: SimDuration) -> Result<RunSummary, SimError> {
        let end = self.now() + duration;
        self.run_until(end)
    }

    /// Finishes every model in id order. Only the first call has an effect.
    pub fn finish(&mut self) {
        if self.phase == Phase::Finished {
            return;
        }
        self.phase = Phase::Finished;

        let ids: Vec<ModelId> = self.registry.iter().map(|info| info.id).collect();
        for id in ids {
            if let Some(slot) = self.models.get_mut(&id) {
                let mut ctx = ModelContext::new(id, &mut self.kernel, &self.registry, &self.clock);
                slot.model.finish(&mut ctx);
            }
        }
        tracing::info!(
            time = %self.kernel.now,
            dispatched = self.dispatched,
            diagnostics = self.diagnostics.len(),
            "simulation finished"
        );
    }

    /// Drops pending events and timers and rewinds time to zero. Models keep
    /// their state and are initialized again on the next run.
    pub fn restart(&mut self) {
        self.kernel.clear();
        self.diagnostics.clear();
        self.dispatched = 0;
        self.phase = Phase::Building;
        tracing::info!("simulation restarted");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HandlerTable;
    use proptest::prelude::*;
    use std::cell::RefCell;

    struct Tag(u32);
    struct Boom;
    struct Ping(u32);

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(SimTime, u32)>,
        finished: u32,
        initialized: u32,
    }

    impl Model for Recorder {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new()
                .on::<Tag>(Recorder::on_tag)
                .on::<Boom>(|_, _, _| Err(SimError::MissingCollaborator("boom")))
        }

        fn initialize(&mut self, _ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
            self.initialized += 1;
            Ok(())
        }

        fn finish(&mut self, _ctx: &mut ModelContext<'_>) {
            self.finished += 1;
        }
    }

    impl Recorder {
        fn on_tag(&mut self, ctx: &mut ModelContext<'_>, tag: &Tag) -> Result<(), SimError> {
            self.seen.push((ctx.now(), tag.0));
            Ok(())
        }
    }

    /// Appends to a log shared by all instances, to observe global order.
    struct Journal {
        log: Rc<RefCell<Vec<(SimTime, u32)>>>,
    }

    impl Model for Journal {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new().on::<Tag>(|journal, ctx, tag| {
                journal.log.borrow_mut().push((ctx.now(), tag.0));
                Ok(())
            })
        }
    }

    /// Bounces a counter back and forth with a peer, 1 ms per hop.
    struct Rally {
        peer: Option<ModelId>,
        hits: Vec<u32>,
    }

    impl Model for Rally {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new().on::<Ping>(|rally, ctx, ping| {
                rally.hits.push(ping.0);
                match rally.peer {
                    Some(peer) if ping.0 < 5 => ctx.schedule_in(peer, SimDuration::from_millis(1), Ping(ping.0 + 1)),
                    _ => Ok(()),
                }
            })
        }
    }

    struct Ticker {
        delay: SimDuration,
        period: SimDuration,
        cancel_after: Option<usize>,
        fires: Vec<SimTime>,
        timer: Option<Timer>,
    }

    impl Ticker {
        fn new(delay_ms: u64, period_ms: u64) -> Self {
            Self {
                delay: SimDuration::from_millis(delay_ms),
                period: SimDuration::from_millis(period_ms),
                cancel_after: None,
                fires: Vec::new(),
                timer: None,
            }
        }
    }

    impl Model for Ticker {
        fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
            let timer = ctx.create_timer(
                |ticker: &mut Ticker, ctx: &mut ModelContext<'_>, timer: Timer, time: SimTime| {
                    ticker.fires.push(time);
                    if ticker.cancel_after == Some(ticker.fires.len()) {
                        timer.cancel(ctx)?;
                    }
                    Ok(())
                },
                self.delay,
                self.period,
            )?;
            self.timer = Some(timer);
            Ok(())
        }
    }

    fn ms(v: u64) -> SimTime {
        SimTime::from_millis(v)
    }

    #[test]
    fn test_equal_times_dispatch_in_schedule_order() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Recorder::default()).unwrap();

        scheduler.schedule_event(id, ms(10), Tag(1)).unwrap();
        scheduler.schedule_event(id, ms(5), Tag(2)).unwrap();
        scheduler.schedule_event(id, ms(10), Tag(3)).unwrap();

        scheduler.run_until(ms(20)).unwrap();

        let seen = &scheduler.model::<Recorder>(id).unwrap().seen;
        assert_eq!(seen, &vec![(ms(5), 2), (ms(10), 1), (ms(10), 3)]);
        assert_eq!(scheduler.now(), ms(20));
    }

    #[test]
    fn test_past_schedule_rejected() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Recorder::default()).unwrap();
        scheduler.run_until(ms(50)).unwrap();

        let result = scheduler.schedule_event(id, ms(49), Tag(0));
        assert!(matches!(result, Err(SimError::InvalidSchedule { .. })));

        // Exactly now is fine
        scheduler.schedule_event(id, ms(50), Tag(0)).unwrap();
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut scheduler = Scheduler::new();
        let result = scheduler.schedule_event(ModelId(42), ms(1), Tag(0));
        assert!(matches!(result, Err(SimError::UnknownModel(ModelId(42)))));
    }

    #[test]
    fn test_unhandled_payload_is_diagnosed() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Recorder::default()).unwrap();
        scheduler.schedule_event(id, ms(3), "stray").unwrap();
        scheduler.schedule_event(id, ms(4), Tag(9)).unwrap();

        scheduler.run_until(ms(10)).unwrap();

        assert_eq!(
            scheduler.diagnostics(),
            &[Diagnostic::Unhandled {
                target: id,
                time: ms(3),
                payload: "&str",
            }]
        );
        // Later events still run
        assert_eq!(scheduler.model::<Recorder>(id).unwrap().seen, vec![(ms(4), 9)]);
    }

    #[test]
    fn test_handler_error_is_not_fatal() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Recorder::default()).unwrap();
        scheduler.schedule_event(id, ms(1), Boom).unwrap();
        scheduler.schedule_event(id, ms(2), Tag(7)).unwrap();

        let summary = scheduler.run_until(ms(5)).unwrap();

        assert_eq!(summary.dispatched, 2);
        assert!(matches!(
            scheduler.diagnostics()[0],
            Diagnostic::HandlerFailed { time, .. } if time == ms(1)
        ));
        assert_eq!(scheduler.model::<Recorder>(id).unwrap().seen.len(), 1);
    }

    #[test]
    fn test_handlers_schedule_on_each_other() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.add_model(Rally { peer: None, hits: Vec::new() }).unwrap();
        let b = scheduler.add_model(Rally { peer: Some(a), hits: Vec::new() }).unwrap();
        scheduler.model_mut::<Rally>(a).unwrap().peer = Some(b);

        scheduler.schedule_event(a, ms(0), Ping(0)).unwrap();
        scheduler.run_until(ms(100)).unwrap();

        assert_eq!(scheduler.model::<Rally>(a).unwrap().hits, vec![0, 2, 4]);
        assert_eq!(scheduler.model::<Rally>(b).unwrap().hits, vec![1, 3, 5]);
        assert_eq!(scheduler.dispatched(), 6);
    }

    #[test]
    fn test_periodic_timer_fire_times() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Ticker::new(5, 10)).unwrap();

        scheduler.run_until(ms(40)).unwrap();

        let ticker = scheduler.model::<Ticker>(id).unwrap();
        assert_eq!(ticker.fires, vec![ms(5), ms(15), ms(25), ms(35)]);
    }

    #[test]
    fn test_cancel_stops_periodic_timer() {
        let mut scheduler = Scheduler::new();
        let mut ticker = Ticker::new(0, 10);
        ticker.cancel_after = Some(3);
        let id = scheduler.add_model(ticker).unwrap();

        scheduler.run_until(ms(100)).unwrap();

        let timer = scheduler.model::<Ticker>(id).unwrap().timer.unwrap();
        assert_eq!(scheduler.model::<Ticker>(id).unwrap().fires, vec![ms(0), ms(10), ms(20)]);
        let next = scheduler.invoke(id, |_: &mut Ticker, ctx| timer.next_firing_time(ctx)).unwrap();
        assert_eq!(next, None);
        assert_eq!(scheduler.pending_events(), 0);
    }

    #[test]
    fn test_one_shot_deactivates() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Ticker::new(7, 0)).unwrap();

        scheduler.run_until(ms(50)).unwrap();

        let ticker = scheduler.model::<Ticker>(id).unwrap();
        assert_eq!(ticker.fires, vec![ms(7)]);
        let timer = ticker.timer.unwrap();
        let next = scheduler.invoke(id, |_: &mut Ticker, ctx| ctx.next_firing_time(timer)).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_reset_reschedules_exactly() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Ticker::new(100, 100)).unwrap();
        scheduler.run_until(ms(30)).unwrap();

        let timer = scheduler.model::<Ticker>(id).unwrap().timer.unwrap();
        let next = scheduler
            .invoke(id, |_: &mut Ticker, ctx| -> Result<Option<SimTime>, SimError> {
                timer.reset(ctx, ms(30), SimDuration::from_millis(12), SimDuration::from_millis(50))?;
                Ok(timer.next_firing_time(ctx))
            })
            .unwrap()
            .unwrap();
        assert_eq!(next, Some(ms(42)));

        scheduler.run_until(ms(150)).unwrap();
        // The original 100 ms firing was discarded
        assert_eq!(scheduler.model::<Ticker>(id).unwrap().fires, vec![ms(42), ms(92), ms(142)]);
    }

    #[test]
    fn test_reset_into_past_rejected() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Ticker::new(100, 0)).unwrap();
        scheduler.run_until(ms(30)).unwrap();

        let timer = scheduler.model::<Ticker>(id).unwrap().timer.unwrap();
        let result = scheduler
            .invoke(id, |_: &mut Ticker, ctx| timer.reset(ctx, ms(10), SimDuration::from_millis(5), SimDuration::ZERO))
            .unwrap();
        assert!(matches!(result, Err(SimError::InvalidSchedule { .. })));
    }

    #[test]
    fn test_timer_handles_are_model_scoped() {
        let mut scheduler = Scheduler::new();
        let owner = scheduler.add_model(Ticker::new(10, 0)).unwrap();
        let other = scheduler.add_model(Recorder::default()).unwrap();
        scheduler.initialize().unwrap();

        let timer = scheduler.model::<Ticker>(owner).unwrap().timer.unwrap();
        let result = scheduler
            .invoke(other, |_: &mut Recorder, ctx| timer.cancel(ctx))
            .unwrap();
        assert!(matches!(result, Err(SimError::UnknownTimer(_))));
    }

    #[test]
    fn test_create_timer_for_wrong_type() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Recorder::default()).unwrap();
        let result = scheduler
            .invoke(id, |_: &mut Recorder, ctx| {
                ctx.create_timer(
                    |_: &mut Ticker, _: &mut ModelContext<'_>, _: Timer, _: SimTime| Ok(()),
                    SimDuration::ZERO,
                    SimDuration::ZERO,
                )
            })
            .unwrap();
        assert!(matches!(result, Err(SimError::TypeMismatch { .. })));
    }

    #[test]
    fn test_paused_clock_blocks_advance() {
        let mut scheduler = Scheduler::with_config(SchedulerConfig::default().with_pause_timeout_ms(10));
        let id = scheduler.add_model(Recorder::default()).unwrap();
        scheduler.schedule_event(id, ms(1), Tag(1)).unwrap();
        scheduler.initialize().unwrap();

        scheduler.clock().pause();
        assert_eq!(scheduler.advance().unwrap(), Advance::Paused);
        assert!(matches!(scheduler.run_until(ms(5)), Err(SimError::PauseTimeout(10))));
        assert!(scheduler.model::<Recorder>(id).unwrap().seen.is_empty());

        scheduler.clock().start();
        assert_eq!(scheduler.advance().unwrap(), Advance::Dispatched(ms(1)));
        assert_eq!(scheduler.advance().unwrap(), Advance::Idle);
    }

    #[test]
    fn test_lifecycle_runs_once() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Recorder::default()).unwrap();

        scheduler.initialize().unwrap();
        scheduler.initialize().unwrap();
        scheduler.finish();
        scheduler.finish();

        let recorder = scheduler.model::<Recorder>(id).unwrap();
        assert_eq!(recorder.initialized, 1);
        assert_eq!(recorder.finished, 1);
    }

    #[test]
    fn test_late_model_is_initialized() {
        let mut scheduler = Scheduler::new();
        scheduler.add_model(Recorder::default()).unwrap();
        scheduler.run_until(ms(10)).unwrap();

        let late = scheduler.add_model(Ticker::new(5, 0)).unwrap();
        scheduler.run_until(ms(20)).unwrap();

        assert_eq!(scheduler.model::<Ticker>(late).unwrap().fires, vec![ms(15)]);
    }

    /// Fails its own initialization after arming a timer.
    struct Faulty;

    impl Model for Faulty {
        fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
            ctx.create_timer(
                |_: &mut Faulty, _: &mut ModelContext<'_>, _: Timer, _: SimTime| Ok(()),
                SimDuration::ZERO,
                SimDuration::from_millis(1),
            )?;
            Err(SimError::MissingCollaborator("faulty"))
        }
    }

    #[test]
    fn test_failed_initialize_does_not_skip_later_models() {
        let mut scheduler = Scheduler::new();
        let faulty = scheduler.add_model(Faulty).unwrap();
        let ticker = scheduler.add_model(Ticker::new(0, 10)).unwrap();
        let recorder = scheduler.add_model(Recorder::default()).unwrap();

        assert!(matches!(scheduler.initialize(), Err(SimError::MissingCollaborator("faulty"))));
        assert!(matches!(
            scheduler.diagnostics(),
            [Diagnostic::HandlerFailed { target, .. }] if *target == faulty
        ));
        assert_eq!(scheduler.model::<Recorder>(recorder).unwrap().initialized, 1);

        scheduler.run_until(ms(25)).unwrap();
        assert_eq!(scheduler.model::<Ticker>(ticker).unwrap().fires, vec![ms(0), ms(10), ms(20)]);
    }

    #[test]
    fn test_failed_late_model_is_removed() {
        let mut scheduler = Scheduler::new();
        scheduler.add_model(Recorder::default()).unwrap();
        scheduler.run_until(ms(10)).unwrap();

        let result = scheduler.add_model_with(Faulty, ModelOptions::default().named("faulty"));
        assert!(matches!(result, Err(SimError::MissingCollaborator("faulty"))));
        assert!(scheduler.registry().find_model_by_name("faulty").is_none());
        assert_eq!(scheduler.registry().len(), 1);
        assert_eq!(scheduler.pending_events(), 0);

        let summary = scheduler.run_until(ms(20)).unwrap();
        assert_eq!(summary.dispatched, 0);
        assert!(scheduler.diagnostics().is_empty());

        // Ids are not reused
        let next = scheduler.add_model(Recorder::default()).unwrap();
        assert_eq!(next, ModelId(3));
    }

    #[test]
    fn test_restart_rewinds() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(Ticker::new(0, 10)).unwrap();
        scheduler.run_until(ms(25)).unwrap();

        scheduler.restart();
        assert_eq!(scheduler.now(), SimTime::ZERO);
        assert_eq!(scheduler.pending_events(), 0);

        scheduler.run_until(ms(5)).unwrap();
        let fires = &scheduler.model::<Ticker>(id).unwrap().fires;
        assert_eq!(fires, &vec![ms(0), ms(10), ms(20), ms(0)]);
    }

    #[test]
    fn test_parent_must_exist() {
        let mut scheduler = Scheduler::new();
        let result = scheduler.add_model_with(Recorder::default(), ModelOptions::default().child_of(ModelId(9)));
        assert!(matches!(result, Err(SimError::UnknownModel(ModelId(9)))));
    }

    proptest! {
        #[test]
        fn test_dispatch_order_is_time_then_sequence(times in proptest::collection::vec(0u64..50, 1..40)) {
            let log = Rc::new(RefCell::new(Vec::new()));
            let mut scheduler = Scheduler::new();
            let a = scheduler.add_model(Journal { log: Rc::clone(&log) }).unwrap();
            let b = scheduler.add_model(Journal { log: Rc::clone(&log) }).unwrap();

            for (i, t) in times.iter().enumerate() {
                let target = if i % 2 == 0 { a } else { b };
                scheduler.schedule_event(target, ms(*t), Tag(i as u32)).unwrap();
            }
            scheduler.run_until(ms(100)).unwrap();

            let mut expected: Vec<(SimTime, u32)> = times
                .iter()
                .enumerate()
                .map(|(i, t)| (ms(*t), i as u32))
                .collect();
            expected.sort();
            prop_assert_eq!(log.borrow().clone(), expected);
        }
    }
}
