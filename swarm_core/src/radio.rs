//! Radio capability: antenna geometry, energy accounting, and a bounded
//! outgoing queue drained by a timer.
//!
//! A model embeds a [`Radio`] and wires it up in its own `initialize`:
//!
//! ```ignore
//! fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
//!     self.radio.initialize::<Bee>(ctx, |bee| &mut bee.radio)
//! }
//! ```
//!
//! The projection lets the radio's timers find the radio again inside the
//! model when they fire.
//!
//! # Energy
//!
//! Every transmission or reception of `n` bytes keeps the radio busy for
//! `n / 125 / bandwidth_kbps` seconds. That time is billed at the tx or rx
//! rate. Every 100 ms the idle remainder of the window is billed at the idle
//! rate; busy time beyond one window carries over to the next.

use crate::entity::PhysicalEntity;
use crate::error::SimError;
use crate::listeners::{Channel, Listeners};
use crate::model::Model;
use crate::scheduler::ModelContext;
use crate::timer::Timer;
use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use swarm_env::{Aggregator, AntennaPattern, BodyState, ModelId, PropagationModel, SimDuration, SimTime, Transmission};

/// Bytes in one kilobit.
pub const BYTES_PER_KILOBIT: f64 = 125.0;

/// Length of one idle-sampling window.
pub const IDLE_WINDOW_MS: u64 = 100;

/// Default bound on the outgoing queue.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 100;

/// Radio parameters. All vectors are in the host's body frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Antenna position relative to the body origin
    pub offset: Vector3<f64>,

    /// Antenna axis
    pub pointing: Vector3<f64>,

    /// Rotation of the antenna about its axis (radians)
    pub roll: f64,

    pub pattern: AntennaPattern,
    pub bandwidth_kbps: f64,

    /// Current draw while transmitting (mA)
    pub tx_energy: f64,

    /// Current draw while receiving (mA)
    pub rx_energy: f64,

    /// Current draw while idle (mA)
    pub idle_energy: f64,

    pub tx_power_dbm: f64,
    pub frequency_mhz: f64,

    /// Outgoing queue bound for `transmit_async`
    pub send_queue_size: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            offset: Vector3::zeros(),
            pointing: Vector3::z(),
            roll: 0.0,
            pattern: AntennaPattern::Isotropic,
            bandwidth_kbps: 250.0,
            tx_energy: 17.4,
            rx_energy: 19.7,
            idle_energy: 0.365,
            tx_power_dbm: 0.0,
            frequency_mhz: 2450.0,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
        }
    }
}

impl RadioConfig {
    pub fn with_offset(mut self, offset: Vector3<f64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_pointing(mut self, pointing: Vector3<f64>, roll: f64) -> Self {
        self.pointing = pointing;
        self.roll = roll;
        self
    }

    pub fn with_pattern(mut self, pattern: AntennaPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_bandwidth_kbps(mut self, kbps: f64) -> Self {
        self.bandwidth_kbps = kbps;
        self
    }

    pub fn with_send_queue_size(mut self, size: usize) -> Self {
        self.send_queue_size = size;
        self
    }
}

/// A transmission arriving at a model's radio.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceptionEvent {
    pub source: ModelId,
    pub payload: Vec<u8>,
    pub rx_power_dbm: f64,
    pub frequency_mhz: f64,
}

/// Body-frame antenna normal for a given pointing and roll.
///
/// Body Y is carried along with the rotation that takes body Z onto
/// `pointing`, then rolled about `pointing`; the normal is that vector
/// crossed with `pointing`.
pub fn antenna_normal(pointing: &Vector3<f64>, roll: f64) -> Vector3<f64> {
    let to_pointing = UnitQuaternion::rotation_between(&Vector3::z(), pointing)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI));
    let mut y = to_pointing * Vector3::y();
    if let Some(axis) = Unit::try_new(*pointing, 1e-12) {
        y = UnitQuaternion::from_axis_angle(&axis, roll) * y;
    }
    y.cross(pointing)
}

/// Radio component held by a model.
pub struct Radio {
    host: PhysicalEntity,
    config: RadioConfig,

    /// Derived once from pointing and roll
    normal: Vector3<f64>,

    propagation: Option<Arc<dyn PropagationModel>>,
    aggregator: Arc<dyn Aggregator>,

    /// Busy time not yet billed against an idle window (ms)
    busy_ms: f64,

    send_queue: VecDeque<Vec<u8>>,
    send_timer: Option<Timer>,
    idle_timer: Option<Timer>,
    listeners: Listeners,
}

impl Radio {
    /// # Errors
    /// * `InvalidConfig` - bandwidth is not a positive finite number
    pub fn new(host: PhysicalEntity, config: RadioConfig, aggregator: Arc<dyn Aggregator>) -> Result<Self, SimError> {
        if !(config.bandwidth_kbps.is_finite() && config.bandwidth_kbps > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "radio bandwidth must be positive, got {} kbps",
                config.bandwidth_kbps
            )));
        }
        let normal = antenna_normal(&config.pointing, config.roll);
        Ok(Self {
            host,
            config,
            normal,
            propagation: None,
            aggregator,
            busy_ms: 0.0,
            send_queue: VecDeque::new(),
            send_timer: None,
            idle_timer: None,
            listeners: Listeners::default(),
        })
    }

    pub fn with_propagation(mut self, propagation: Arc<dyn PropagationModel>) -> Self {
        self.propagation = Some(propagation);
        self
    }

    pub fn attach_propagation(&mut self, propagation: Arc<dyn PropagationModel>) {
        self.propagation = Some(propagation);
    }

    /// Starts the idle-sampling and send timers on the owning model.
    ///
    /// `project` maps the owning model to this radio.
    pub fn initialize<M: Model>(&mut self, ctx: &mut ModelContext<'_>, project: fn(&mut M) -> &mut Radio) -> Result<(), SimError> {
        let idle = ctx.create_timer(
            move |model: &mut M, _: &mut ModelContext<'_>, _: Timer, _: SimTime| {
                project(model).sample_idle();
                Ok(())
            },
            SimDuration::ZERO,
            SimDuration::from_millis(IDLE_WINDOW_MS),
        )?;
        let send = ctx.create_timer(
            move |model: &mut M, ctx: &mut ModelContext<'_>, timer: Timer, time: SimTime| {
                project(model).drain(ctx, timer, time)
            },
            SimDuration::ZERO,
            SimDuration::ZERO,
        )?;
        self.idle_timer = Some(idle);
        self.send_timer = Some(send);
        Ok(())
    }

    pub fn host(&self) -> &PhysicalEntity {
        &self.host
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn pattern(&self) -> AntennaPattern {
        self.config.pattern
    }

    /// Antenna normal in the body frame.
    pub fn body_normal(&self) -> Vector3<f64> {
        self.normal
    }

    pub fn has_propagation(&self) -> bool {
        self.propagation.is_some()
    }

    /// Busy time carried into the current idle window (ms).
    pub fn busy_time_ms(&self) -> f64 {
        self.busy_ms
    }

    pub fn queue_len(&self) -> usize {
        self.send_queue.len()
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn add_listener(&mut self, model: ModelId) -> bool {
        self.listeners.add(model)
    }

    pub fn remove_listener(&mut self, model: ModelId) -> bool {
        self.listeners.remove(model)
    }

    fn position_in(&self, state: &BodyState) -> Vector3<f64> {
        if self.config.offset == Vector3::zeros() {
            state.position
        } else {
            state.position + state.to_world(&self.config.offset)
        }
    }

    /// Antenna position in the world frame.
    pub fn position(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.position_in(&self.host.state()?))
    }

    /// Antenna axis in the world frame.
    pub fn antenna_pointing(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.host.state()?.to_world(&self.config.pointing))
    }

    /// Antenna normal in the world frame.
    pub fn antenna_normal(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.host.state()?.to_world(&self.normal))
    }

    fn airtime_secs(&self, bytes: usize) -> f64 {
        bytes as f64 / BYTES_PER_KILOBIT / self.config.bandwidth_kbps
    }

    /// Time on air for `bytes` at the configured bandwidth.
    pub fn airtime(&self, bytes: usize) -> SimDuration {
        SimDuration::from_secs_f64(self.airtime_secs(bytes))
    }

    fn account(&mut self, bytes: usize, rate: f64, key: &str) {
        let secs = self.airtime_secs(bytes);
        self.busy_ms += secs * 1000.0;
        self.aggregator.add_value("energy", key, secs * rate);
    }

    /// Sends `data` now and schedules a `ReceptionEvent` on every receiver
    /// the propagation model reports. Returns the number of receivers.
    ///
    /// # Errors
    /// * `MissingCollaborator` - no propagation model attached; nothing is billed
    /// * `UnknownObject` - the host body is gone
    pub fn transmit(&mut self, ctx: &mut ModelContext<'_>, data: &[u8]) -> Result<usize, SimError> {
        let propagation = self
            .propagation
            .clone()
            .ok_or(SimError::MissingCollaborator("propagation model"))?;
        let state = self.host.state()?;

        self.account(data.len(), self.config.tx_energy, "radio-tx");

        let tx = Transmission {
            source: ctx.model_id(),
            time: ctx.now(),
            position: self.position_in(&state),
            pointing: state.to_world(&self.config.pointing),
            normal: state.to_world(&self.normal),
            pattern: self.config.pattern,
            tx_power_dbm: self.config.tx_power_dbm,
            frequency_mhz: self.config.frequency_mhz,
            payload: data.to_vec(),
        };

        let mut delivered = 0;
        for reception in propagation.propagate(&tx) {
            if reception.receiver == tx.source {
                continue;
            }
            let event = ReceptionEvent {
                source: tx.source,
                payload: reception.payload,
                rx_power_dbm: reception.rx_power_dbm,
                frequency_mhz: reception.frequency_mhz,
            };
            match ctx.schedule_event(reception.receiver, reception.time, event) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(receiver = %reception.receiver, "dropping reception: {}", e),
            }
        }

        tracing::trace!(source = %tx.source, bytes = data.len(), delivered, "radio transmit");
        Ok(delivered)
    }

    /// Bills a reception. Called for every frame the radio hears.
    pub fn receive(&mut self, time: SimTime, data: &[u8], rx_power_dbm: f64, frequency_mhz: f64) {
        self.account(data.len(), self.config.rx_energy, "radio-rx");
        tracing::trace!(%time, bytes = data.len(), rx_power_dbm, frequency_mhz, "radio receive");
    }

    /// Handles a `ReceptionEvent` routed to the owning model: bills it and
    /// forwards the payload to every listener.
    pub fn handle_reception(&mut self, ctx: &mut ModelContext<'_>, event: &ReceptionEvent) -> Result<(), SimError> {
        let now = ctx.now();
        self.receive(now, &event.payload, event.rx_power_dbm, event.frequency_mhz);
        self.listeners
            .notify(ctx, now, &event.payload, event.rx_power_dbm, Channel::Radio);
        Ok(())
    }

    /// Queues `data` for sending as soon as the radio is free.
    ///
    /// Returns `false` without queuing when the queue already holds
    /// `send_queue_size` packets, or the radio was never initialized.
    pub fn transmit_async(&mut self, ctx: &mut ModelContext<'_>, data: Vec<u8>) -> bool {
        let Some(timer) = self.send_timer else {
            tracing::warn!(model = %ctx.model_id(), "transmit_async on uninitialized radio");
            return false;
        };
        if self.send_queue.len() >= self.config.send_queue_size {
            tracing::debug!(model = %ctx.model_id(), queued = self.send_queue.len(), "send queue full");
            return false;
        }

        self.send_queue.push_back(data);
        if timer.next_firing_time(ctx).is_none() {
            let now = ctx.now();
            if let Err(e) = timer.reset(ctx, now, SimDuration::ZERO, SimDuration::ZERO) {
                tracing::warn!("failed to arm send timer: {}", e);
            }
        }
        true
    }

    /// Send-timer callback: sends the head packet, then waits out the next
    /// packet's airtime or goes idle.
    fn drain(&mut self, ctx: &mut ModelContext<'_>, timer: Timer, time: SimTime) -> Result<(), SimError> {
        let Some(packet) = self.send_queue.pop_front() else {
            return timer.cancel(ctx);
        };
        let sent = self.transmit(ctx, &packet);

        match self.send_queue.front() {
            Some(next) => {
                let delay = self.airtime(next.len());
                timer.reset(ctx, time, delay, SimDuration::ZERO)?;
            }
            None => timer.cancel(ctx)?,
        }
        sent.map(|_| ())
    }

    /// Idle-timer callback.
    fn sample_idle(&mut self) {
        let window = IDLE_WINDOW_MS as f64;
        let idle = window - self.busy_ms;
        if idle >= 0.0 {
            self.aggregator
                .add_value("energy", "radio-idle", self.config.idle_energy * idle / 1000.0);
            self.busy_ms = 0.0;
        } else {
            self.busy_ms -= window;
        }
    }
}

impl fmt::Debug for Radio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Radio")
            .field("host", &self.host)
            .field("config", &self.config)
            .field("busy_ms", &self.busy_ms)
            .field("queued", &self.send_queue.len())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::StaticWorld;
    use crate::listeners::MessageReceived;
    use crate::model::HandlerTable;
    use crate::scheduler::{Advance, Scheduler};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Mutex;
    use swarm_env::{ObjectId, Reception};

    #[derive(Default)]
    struct Tally {
        values: Mutex<Vec<(String, String, f64)>>,
    }

    impl Tally {
        fn total(&self, key: &str) -> f64 {
            self.values
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, k, _)| k == key)
                .map(|(_, _, v)| v)
                .sum()
        }

        fn count(&self, key: &str) -> usize {
            self.values.lock().unwrap().iter().filter(|(_, k, _)| k == key).count()
        }
    }

    impl Aggregator for Tally {
        fn add_value(&self, category: &str, key: &str, value: f64) {
            self.values
                .lock()
                .unwrap()
                .push((category.to_string(), key.to_string(), value));
        }
    }

    /// Delivers every transmission to every known receiver after `delay`.
    struct Everyone {
        receivers: Mutex<Vec<ModelId>>,
        delay: SimDuration,
        sent_at: Mutex<Vec<SimTime>>,
    }

    impl Everyone {
        fn new(delay: SimDuration) -> Arc<Self> {
            Arc::new(Self {
                receivers: Mutex::new(Vec::new()),
                delay,
                sent_at: Mutex::new(Vec::new()),
            })
        }
    }

    impl PropagationModel for Everyone {
        fn propagate(&self, tx: &Transmission) -> Vec<Reception> {
            self.sent_at.lock().unwrap().push(tx.time);
            self.receivers
                .lock()
                .unwrap()
                .iter()
                .filter(|r| **r != tx.source)
                .map(|r| Reception {
                    time: tx.time + self.delay,
                    receiver: *r,
                    payload: tx.payload.clone(),
                    rx_power_dbm: -50.0,
                    frequency_mhz: tx.frequency_mhz,
                })
                .collect()
        }
    }

    struct Station {
        radio: Radio,
    }

    impl Model for Station {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new().on::<ReceptionEvent>(|station, ctx, event| station.radio.handle_reception(ctx, event))
        }

        fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
            self.radio.initialize::<Station>(ctx, |station| &mut station.radio)
        }
    }

    #[derive(Default)]
    struct Ear {
        heard: Vec<MessageReceived>,
    }

    impl Model for Ear {
        fn handlers() -> HandlerTable<Self> {
            HandlerTable::new().on::<MessageReceived>(|ear, _, msg| {
                ear.heard.push(msg.clone());
                Ok(())
            })
        }
    }

    fn station(world: &Arc<StaticWorld>, object: u64, config: RadioConfig, tally: &Arc<Tally>) -> Station {
        world.add_body(BodyState::at_rest(ObjectId(object), Vector3::new(object as f64, 0.0, 1.0), 0.1));
        let host = PhysicalEntity::new(ObjectId(object), world.clone());
        Station {
            radio: Radio::new(host, config, tally.clone()).unwrap(),
        }
    }

    #[test]
    fn test_default_normal() {
        assert_relative_eq!(antenna_normal(&Vector3::z(), 0.0), Vector3::x(), epsilon = 1e-12);
    }

    #[test]
    fn test_normal_with_roll() {
        assert_relative_eq!(antenna_normal(&Vector3::z(), FRAC_PI_2), Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_normal_for_sideways_and_flipped_antenna() {
        assert_relative_eq!(antenna_normal(&Vector3::x(), 0.0), -Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(antenna_normal(&-Vector3::z(), 0.0), Vector3::x(), epsilon = 1e-12);
    }

    #[test]
    fn test_world_geometry_follows_host() {
        let mut state = BodyState::at_rest(ObjectId(1), Vector3::new(2.0, 0.0, 0.0), 0.1);
        state.orientation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let world = StaticWorld::with_body(state);
        let config = RadioConfig::default()
            .with_offset(Vector3::new(1.0, 0.0, 0.0))
            .with_pointing(Vector3::x(), 0.0);
        let radio = Radio::new(PhysicalEntity::new(ObjectId(1), world), config, Arc::new(Tally::default())).unwrap();

        assert_relative_eq!(radio.position().unwrap(), Vector3::new(2.0, 1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(radio.antenna_pointing().unwrap(), Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(radio.antenna_normal().unwrap(), -Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_250_bytes_at_250_kbps_is_8ms() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let propagation = Everyone::new(SimDuration::ZERO);
        let mut s = station(&world, 1, RadioConfig::default(), &tally);
        s.radio.attach_propagation(propagation);

        assert_eq!(s.radio.airtime(250), SimDuration::from_millis(8));

        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(s).unwrap();
        scheduler
            .invoke(id, |s: &mut Station, ctx| s.radio.transmit(ctx, &[0u8; 250]))
            .unwrap()
            .unwrap();

        let radio = &scheduler.model::<Station>(id).unwrap().radio;
        assert_relative_eq!(radio.busy_time_ms(), 8.0, epsilon = 1e-9);
        assert_relative_eq!(tally.total("radio-tx"), 0.008 * 17.4, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_propagation_bills_nothing() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(station(&world, 1, RadioConfig::default(), &tally)).unwrap();

        let result = scheduler
            .invoke(id, |s: &mut Station, ctx| s.radio.transmit(ctx, b"hello"))
            .unwrap();

        assert!(matches!(result, Err(SimError::MissingCollaborator(_))));
        assert_eq!(scheduler.model::<Station>(id).unwrap().radio.busy_time_ms(), 0.0);
        assert_eq!(tally.count("radio-tx"), 0);
    }

    #[test]
    fn test_idle_sampling_carries_excess() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let config = RadioConfig::default().with_bandwidth_kbps(8.0);
        let mut radio = station(&world, 1, config, &tally).radio;

        // 250 bytes at 8 kbps keep the radio busy for 250 ms
        radio.receive(SimTime::ZERO, &[0u8; 250], -60.0, 2450.0);
        assert_relative_eq!(radio.busy_time_ms(), 250.0, epsilon = 1e-9);

        radio.sample_idle();
        assert_relative_eq!(radio.busy_time_ms(), 150.0, epsilon = 1e-9);
        radio.sample_idle();
        assert_relative_eq!(radio.busy_time_ms(), 50.0, epsilon = 1e-9);
        assert_eq!(tally.count("radio-idle"), 0);

        radio.sample_idle();
        assert_eq!(radio.busy_time_ms(), 0.0);
        assert_relative_eq!(tally.total("radio-idle"), 0.365 * 50.0 / 1000.0, epsilon = 1e-12);
    }

    #[test]
    fn test_idle_timer_runs_every_window() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let mut scheduler = Scheduler::new();
        scheduler.add_model(station(&world, 1, RadioConfig::default(), &tally)).unwrap();

        scheduler.run_until(SimTime::from_millis(350)).unwrap();

        // Fires at 0, 100, 200, 300
        assert_eq!(tally.count("radio-idle"), 4);
        assert_relative_eq!(tally.total("radio-idle"), 4.0 * 0.365 * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_capacity_two_backpressure() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let config = RadioConfig::default()
            .with_bandwidth_kbps(125.0)
            .with_send_queue_size(2);
        let mut s = station(&world, 1, config, &tally);
        s.radio.attach_propagation(Everyone::new(SimDuration::ZERO));

        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(s).unwrap();
        scheduler.run_until(SimTime::from_millis(10)).unwrap();

        let accepted = scheduler
            .invoke(id, |s: &mut Station, ctx| {
                (0..3)
                    .map(|i| s.radio.transmit_async(ctx, vec![i]))
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(accepted, vec![true, true, false]);

        // One drain cycle sends the head packet
        assert_eq!(
            scheduler.advance().unwrap(),
            Advance::Dispatched(SimTime::from_millis(10))
        );
        assert_eq!(scheduler.model::<Station>(id).unwrap().radio.queue_len(), 1);
        // Next packet waits out one byte at 125 kbps
        assert_eq!(
            scheduler.next_event_time(),
            Some(SimTime::from_millis(10) + SimDuration::from_micros(64))
        );

        let fourth = scheduler
            .invoke(id, |s: &mut Station, ctx| s.radio.transmit_async(ctx, vec![9]))
            .unwrap();
        assert!(fourth);
    }

    #[test]
    fn test_zero_bandwidth_rejected() {
        let world = StaticWorld::with_body(BodyState::at_rest(ObjectId(1), Vector3::zeros(), 0.1));
        for kbps in [0.0, -5.0, f64::NAN] {
            let config = RadioConfig::default().with_bandwidth_kbps(kbps);
            let result = Radio::new(PhysicalEntity::new(ObjectId(1), world.clone()), config, Arc::new(Tally::default()));
            assert!(matches!(result, Err(SimError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_drain_spaces_packets_by_airtime() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let propagation = Everyone::new(SimDuration::ZERO);
        let mut s = station(&world, 1, RadioConfig::default(), &tally);
        s.radio.attach_propagation(propagation.clone());

        let mut scheduler = Scheduler::new();
        let id = scheduler.add_model(s).unwrap();
        scheduler.run_until(SimTime::from_millis(1)).unwrap();

        scheduler
            .invoke(id, |s: &mut Station, ctx| {
                for _ in 0..3 {
                    assert!(s.radio.transmit_async(ctx, vec![0u8; 250]));
                }
            })
            .unwrap();
        scheduler.run_until(SimTime::from_millis(50)).unwrap();

        let sent = propagation.sent_at.lock().unwrap().clone();
        assert_eq!(sent, vec![SimTime::from_millis(1), SimTime::from_millis(9), SimTime::from_millis(17)]);
        assert_eq!(scheduler.model::<Station>(id).unwrap().radio.queue_len(), 0);
    }

    #[test]
    fn test_reception_reaches_listeners() {
        let world = Arc::new(StaticWorld::default());
        let tally = Arc::new(Tally::default());
        let propagation = Everyone::new(SimDuration::from_micros(3));

        let mut a = station(&world, 1, RadioConfig::default(), &tally);
        let mut b = station(&world, 2, RadioConfig::default(), &tally);
        a.radio.attach_propagation(propagation.clone());
        b.radio.attach_propagation(propagation.clone());

        let mut scheduler = Scheduler::new();
        let ear = scheduler.add_model(Ear::default()).unwrap();
        b.radio.add_listener(ear);
        let a = scheduler.add_model(a).unwrap();
        let b = scheduler.add_model(b).unwrap();
        propagation.receivers.lock().unwrap().extend([a, b]);

        scheduler.run_until(SimTime::from_millis(5)).unwrap();
        scheduler
            .invoke(a, |s: &mut Station, ctx| s.radio.transmit(ctx, b"waggle"))
            .unwrap()
            .unwrap();
        scheduler.run_until(SimTime::from_millis(6)).unwrap();

        let heard = &scheduler.model::<Ear>(ear).unwrap().heard;
        assert_eq!(heard.len(), 1);
        assert_eq!(heard[0].payload, b"waggle".to_vec());
        assert_eq!(heard[0].rx_power_dbm, -50.0);
        assert_eq!(heard[0].channel, Channel::Radio);
        assert_eq!(heard[0].time, SimTime::from_millis(5) + SimDuration::from_micros(3));
        assert_eq!(tally.count("radio-rx"), 1);
    }
}
