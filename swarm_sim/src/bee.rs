//! The reference bee: a hovering random walker that beacons over its radio,
//! watches the ground for flowers, and can greet the swarm through the
//! network simulator.

use crate::error::HarnessError;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use swarm_core::{
    Channel, FlowerSensor, HandlerTable, MessageReceived, Model, ModelContext, ModelId, NsEvent, NsInterface,
    ObjectId, PhysicalEntity, Platform, Radio, ReceptionEvent, SimDuration, SimError, SimTime, Timer,
};
use swarm_env::NsPacket;

/// Vertical speed (m/s) commanded per metre of altitude error.
const ALTITUDE_GAIN: f64 = 2.0;

/// Behaviour and body parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeeConfig {
    /// Body radius (m)
    pub radius: f64,

    /// Body mass (kg)
    pub mass: f64,

    /// Altitude the bee holds (m)
    pub hover_height: f64,

    /// Horizontal speed (m/s)
    pub cruise_speed: f64,

    /// Heading noise per kinematics tick (rad, std dev)
    pub turn_std: f64,

    /// Beyond this horizontal distance from the origin the bee turns home (m)
    pub leash_radius: f64,

    pub kinematics_interval_ms: u64,

    /// `None` disables beaconing
    pub beacon_interval_ms: Option<u64>,

    /// Beacon payload size (bytes)
    pub beacon_size: usize,

    /// Beacons queued per beacon tick
    pub beacons_per_tick: usize,

    /// `None` disables flower sensing
    pub sense_interval_ms: Option<u64>,

    /// Broadcast one greeting through the network simulator
    pub ns_hello: bool,

    pub ns_hello_delay_ms: u64,
}

impl Default for BeeConfig {
    fn default() -> Self {
        Self {
            radius: 0.05,
            mass: 0.1,
            hover_height: 0.5,
            cruise_speed: 0.3,
            turn_std: 0.4,
            leash_radius: 5.0,
            kinematics_interval_ms: 100,
            beacon_interval_ms: Some(500),
            beacon_size: 32,
            beacons_per_tick: 1,
            sense_interval_ms: Some(200),
            ns_hello: false,
            ns_hello_delay_ms: 50,
        }
    }
}

/// What one bee did and heard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BeeStats {
    pub beacons_queued: u64,
    pub beacons_rejected: u64,
    pub radio_messages: u64,
    pub ns_messages: u64,

    /// Models whose beacons or greetings reached this bee
    pub heard_from: BTreeSet<ModelId>,

    pub sense_samples: u64,

    /// Samples in which at least one flower was in view
    pub flower_sightings: u64,

    pub flowers_seen: BTreeSet<ObjectId>,
}

/// Builds a beacon payload, zero-padded to `size`.
pub fn beacon_payload(source: ModelId, seq: u64, size: usize) -> Vec<u8> {
    let mut payload = format!("bee:{}:{}", source.0, seq).into_bytes();
    if payload.len() < size {
        payload.resize(size, 0);
    }
    payload
}

/// Recovers the sender from a beacon or greeting payload.
pub fn payload_sender(payload: &[u8]) -> Option<ModelId> {
    let text = payload.split(|b| *b == 0).next()?;
    let text = std::str::from_utf8(text).ok()?;
    let mut parts = text.split(':');
    match parts.next()? {
        "bee" | "hello" => parts.next()?.parse().ok().map(ModelId),
        _ => None,
    }
}

pub struct Bee {
    config: BeeConfig,
    body: PhysicalEntity,
    radio: Radio,
    ns: NsInterface,
    sensors: Vec<FlowerSensor>,
    rng: ChaCha8Rng,
    turn: Normal<f64>,
    heading: f64,
    next_seq: u64,
    beacon_timer: Option<Timer>,
    stats: BeeStats,
}

impl Bee {
    pub fn new(
        config: BeeConfig,
        body: PhysicalEntity,
        radio: Radio,
        ns: NsInterface,
        sensors: Vec<FlowerSensor>,
        seed: u64,
    ) -> Result<Self, HarnessError> {
        let turn = Normal::new(0.0, config.turn_std)
            .map_err(|e| HarnessError::config(format!("turn_std {}: {e}", config.turn_std)))?;
        if config.kinematics_interval_ms == 0 {
            return Err(HarnessError::config("kinematics interval must be positive"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let heading = rng.gen_range(0.0..std::f64::consts::TAU);
        Ok(Self {
            config,
            body,
            radio,
            ns,
            sensors,
            rng,
            turn,
            heading,
            next_seq: 0,
            beacon_timer: None,
            stats: BeeStats::default(),
        })
    }

    pub fn config(&self) -> &BeeConfig {
        &self.config
    }

    pub fn stats(&self) -> &BeeStats {
        &self.stats
    }

    pub fn body(&self) -> &PhysicalEntity {
        &self.body
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    /// Stops the beacon timer; queued beacons still drain.
    pub fn stop_beacons(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
        match self.beacon_timer.take() {
            Some(timer) => timer.cancel(ctx),
            None => Ok(()),
        }
    }

    /// Picks a new heading and pushes the body toward the resulting velocity.
    fn wander(&mut self, _ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
        let state = self.body.state()?;
        let home = -state.position.xy();
        if home.norm() > self.config.leash_radius {
            self.heading = home.y.atan2(home.x);
        } else {
            self.heading += self.turn.sample(&mut self.rng);
        }

        let desired = Vector3::new(
            self.heading.cos() * self.config.cruise_speed,
            self.heading.sin() * self.config.cruise_speed,
            (self.config.hover_height - state.position.z) * ALTITUDE_GAIN,
        );
        self.body
            .apply_impulse((desired - state.linear_velocity) * self.config.mass)
    }

    fn beacon(&mut self, ctx: &mut ModelContext<'_>) {
        let me = ctx.model_id();
        for _ in 0..self.config.beacons_per_tick {
            let payload = beacon_payload(me, self.next_seq, self.config.beacon_size);
            self.next_seq += 1;
            if self.radio.transmit_async(ctx, payload) {
                self.stats.beacons_queued += 1;
            } else {
                self.stats.beacons_rejected += 1;
            }
        }
    }

    fn sense(&mut self) -> Result<(), SimError> {
        for sensor in &self.sensors {
            let flowers = sensor.detect_flowers()?;
            self.stats.sense_samples += 1;
            if !flowers.is_empty() {
                self.stats.flower_sightings += 1;
                self.stats
                    .flowers_seen
                    .extend(flowers.iter().map(|f| f.object));
            }
        }
        Ok(())
    }

    fn on_message(&mut self, ctx: &mut ModelContext<'_>, message: &MessageReceived) -> Result<(), SimError> {
        match message.channel {
            Channel::Radio => self.stats.radio_messages += 1,
            Channel::Ns => self.stats.ns_messages += 1,
        }
        if let Some(sender) = payload_sender(&message.payload) {
            if sender != ctx.model_id() {
                self.stats.heard_from.insert(sender);
            }
        }
        Ok(())
    }

    /// First fire is spread over one period so bees do not beacon in lockstep.
    fn phase(&mut self, period_ms: u64) -> SimDuration {
        SimDuration::from_millis(self.rng.gen_range(0..period_ms.max(1)))
    }
}

impl Model for Bee {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::<Self>::new()
            .on::<ReceptionEvent>(|bee, ctx, event| bee.radio.handle_reception(ctx, event))
            .on::<NsEvent>(|bee, ctx, event| bee.ns.handle_delivery(ctx, event))
            .on::<MessageReceived>(Bee::on_message)
    }

    fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
        self.radio.initialize::<Bee>(ctx, |bee| &mut bee.radio)?;
        self.ns.initialize::<Bee>(ctx, |bee| &mut bee.ns)?;

        let me = ctx.model_id();
        self.radio.add_listener(me);
        self.ns.add_listener(me);

        let step = SimDuration::from_millis(self.config.kinematics_interval_ms);
        ctx.create_timer(
            |bee: &mut Bee, ctx: &mut ModelContext<'_>, _: Timer, _: SimTime| bee.wander(ctx),
            SimDuration::ZERO,
            step,
        )?;

        if let Some(ms) = self.config.beacon_interval_ms.filter(|ms| *ms > 0) {
            let phase = self.phase(ms);
            let timer = ctx.create_timer(
                |bee: &mut Bee, ctx: &mut ModelContext<'_>, _: Timer, _: SimTime| {
                    bee.beacon(ctx);
                    Ok(())
                },
                phase,
                SimDuration::from_millis(ms),
            )?;
            self.beacon_timer = Some(timer);
        }

        if let Some(ms) = self.config.sense_interval_ms.filter(|ms| *ms > 0) {
            let phase = self.phase(ms);
            ctx.create_timer(
                |bee: &mut Bee, _: &mut ModelContext<'_>, _: Timer, _: SimTime| bee.sense(),
                phase,
                SimDuration::from_millis(ms),
            )?;
        }

        if self.config.ns_hello {
            let at = ctx.now() + SimDuration::from_millis(self.config.ns_hello_delay_ms);
            let packet = NsPacket::broadcast(format!("hello:{}", me.0).into_bytes(), me, at);
            if !self.ns.enqueue(ctx, packet) {
                tracing::warn!(bee = %me, "ns queue rejected greeting");
            }
        }

        tracing::debug!(bee = %me, object = %self.body.object(), "bee initialized");
        Ok(())
    }

    fn finish(&mut self, ctx: &mut ModelContext<'_>) {
        tracing::debug!(
            bee = %ctx.model_id(),
            queued = self.stats.beacons_queued,
            rejected = self.stats.beacons_rejected,
            heard = self.stats.heard_from.len(),
            flowers = self.stats.flowers_seen.len(),
            "bee finished"
        );
    }
}

impl Platform for Bee {
    fn radio(&self) -> Option<&Radio> {
        Some(&self.radio)
    }

    fn ns(&self) -> Option<&NsInterface> {
        Some(&self.ns)
    }

    fn sensor(&self, name: &str) -> Option<&FlowerSensor> {
        self.sensors.iter().find(|s| s.name() == name)
    }

    fn sensor_names(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.name()).collect()
    }
}
