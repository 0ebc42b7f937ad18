//! SimWorld - the simulation harness container.

use crate::backend::{NetworkConfig, SimNetworkBackend};
use crate::bee::{Bee, BeeConfig, BeeStats};
use crate::error::HarnessError;
use crate::kinematics::KinematicWorld;
use crate::propagation::{FreeSpacePropagation, PropagationConfig};
use crate::stepper::PhysicsStepper;
use crate::telemetry::MetricsAggregator;

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{
    FlowerSensor, ModelId, ModelOptions, NsInterface, PhysicalEntity, Radio, RadioConfig, RunSummary, Scheduler,
    SchedulerConfig, SensorConfig, SimDuration, SimTime,
};
use swarm_env::{NetworkBridge, TokioBridge};

/// Name of the flower sensor every bee carries.
pub const BELLY_SENSOR: &str = "belly";

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of bees to spawn
    pub num_bees: usize,

    /// Physics tick rate in Hz
    pub tick_rate_hz: u32,

    /// Simulated duration of a run in seconds
    pub max_duration_secs: f64,

    /// Bees spawn and flowers scatter over `[-e, e]²` (m)
    pub arena_half_extent: f64,

    /// Flowers scattered at random
    pub num_flowers: usize,

    /// Plant one flower directly under every spawn point
    pub flower_under_spawn: bool,

    pub bee: BeeConfig,
    pub radio: RadioConfig,
    pub sensor: SensorConfig,
    pub propagation: PropagationConfig,

    /// Attach the network-simulator bridge to every bee
    pub use_network: bool,

    pub network: NetworkConfig,

    /// Wall-clock limit on one bridge exchange (ms)
    pub bridge_timeout_ms: Option<u64>,

    pub scheduler: SchedulerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        let bee = BeeConfig::default();
        let sensor = SensorConfig::default().with_offset(Vector3::new(0.0, 0.0, -bee.radius));
        Self {
            seed: 42,
            num_bees: 6,
            tick_rate_hz: 100,
            max_duration_secs: 10.0,
            arena_half_extent: 3.0,
            num_flowers: 30,
            flower_under_spawn: false,
            bee,
            radio: RadioConfig::default(),
            sensor,
            propagation: PropagationConfig::default(),
            use_network: false,
            network: NetworkConfig::default(),
            bridge_timeout_ms: Some(5_000),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parses a JSON config; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, HarnessError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn duration(&self) -> SimDuration {
        SimDuration::from_secs_f64(self.max_duration_secs)
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Event scheduler owning every model
    pub scheduler: Scheduler,

    /// Ground truth physics
    pub physics: Arc<KinematicWorld>,

    pub propagation: Arc<FreeSpacePropagation>,
    pub metrics: Arc<MetricsAggregator>,

    /// Fault-injection handle on the network backend
    network: Option<SimNetworkBackend>,

    bridge: Option<Arc<dyn NetworkBridge>>,
    stepper: ModelId,
    bees: Vec<ModelId>,

    /// Spawn points and per-bee seeds
    behaviour_rng: ChaCha8Rng,
}

impl SimWorld {
    /// Creates a SimWorld with the physics stepper registered and flowers
    /// scattered. Bees are added by `spawn_bees`.
    pub fn new(config: SimConfig) -> Result<Self, HarnessError> {
        // Derive separate seeds for different subsystems
        let behaviour_seed = config.seed;
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let network_seed = config.seed.wrapping_mul(0x517cc1b727220a95);

        let physics = Arc::new(KinematicWorld::new(physics_seed));
        physics.scatter_flowers(config.num_flowers, config.arena_half_extent);

        let propagation = Arc::new(FreeSpacePropagation::new(physics.clone(), config.propagation.clone()));
        let metrics = Arc::new(MetricsAggregator::new());

        let mut scheduler = Scheduler::with_config(config.scheduler.clone());
        let stepper = scheduler.add_model_with(
            PhysicsStepper::at_rate(physics.clone(), config.tick_rate_hz)?,
            ModelOptions::default().named("physics"),
        )?;

        let (network, bridge) = if config.use_network {
            let backend = SimNetworkBackend::new(network_seed, config.network.clone());
            let timeout = config.bridge_timeout_ms.map(Duration::from_millis);
            let bridge: Arc<dyn NetworkBridge> = Arc::new(TokioBridge::new(backend.clone(), timeout)?);
            (Some(backend), Some(bridge))
        } else {
            (None, None)
        };

        tracing::debug!(seed = config.seed, physics_seed, network_seed, "sim world created");

        Ok(Self {
            config,
            scheduler,
            physics,
            propagation,
            metrics,
            network,
            bridge,
            stepper,
            bees: Vec::new(),
            behaviour_rng: ChaCha8Rng::seed_from_u64(behaviour_seed),
        })
    }

    /// Spawns `num_bees` bees at random points in the arena.
    pub fn spawn_bees(&mut self) -> Result<Vec<ModelId>, HarnessError> {
        let extent = self.config.arena_half_extent.max(0.0);
        let mut ids = Vec::with_capacity(self.config.num_bees);
        for _ in 0..self.config.num_bees {
            let x = self.behaviour_rng.gen_range(-extent..=extent);
            let y = self.behaviour_rng.gen_range(-extent..=extent);
            ids.push(self.spawn_bee(x, y)?);
        }
        Ok(ids)
    }

    /// Spawns one bee hovering over `(x, y)`.
    pub fn spawn_bee(&mut self, x: f64, y: f64) -> Result<ModelId, HarnessError> {
        let bee_config = self.config.bee.clone();
        let object = self.physics.add_body(
            Vector3::new(x, y, bee_config.hover_height),
            bee_config.radius,
            bee_config.mass,
        )?;
        if self.config.flower_under_spawn {
            self.physics.add_flower(x, y);
        }

        let body = PhysicalEntity::new(object, self.physics.clone());
        let radio = Radio::new(body.clone(), self.config.radio.clone(), self.metrics.clone())?
            .with_propagation(self.propagation.clone());
        let mut ns = NsInterface::new(self.metrics.clone()).with_world(self.physics.clone());
        if let Some(bridge) = &self.bridge {
            ns.attach_bridge(bridge.clone());
        }
        let sensor = FlowerSensor::new(BELLY_SENSOR, body.clone(), self.physics.clone(), self.config.sensor.clone());

        let seed = self.behaviour_rng.gen::<u64>();
        let bee = Bee::new(bee_config, body, radio, ns, vec![sensor], seed)?;

        let name = format!("bee-{}", self.bees.len());
        let id = self
            .scheduler
            .add_model_with(bee, ModelOptions::default().named(name).embodied_as(object))?;
        self.propagation.register(id, object, &self.config.radio);
        self.bees.push(id);
        Ok(id)
    }

    /// Runs to `max_duration_secs`.
    pub fn run(&mut self) -> Result<RunSummary, HarnessError> {
        let end = SimTime::ZERO + self.config.duration();
        self.run_until(end)
    }

    pub fn run_until(&mut self, end: SimTime) -> Result<RunSummary, HarnessError> {
        Ok(self.scheduler.run_until(end)?)
    }

    pub fn finish(&mut self) {
        self.scheduler.finish();
    }

    pub fn bees(&self) -> &[ModelId] {
        &self.bees
    }

    pub fn bee(&self, id: ModelId) -> Option<&Bee> {
        self.scheduler.model::<Bee>(id)
    }

    /// Stats of every bee, in spawn order.
    pub fn bee_stats(&self) -> Vec<(ModelId, BeeStats)> {
        self.bees
            .iter()
            .filter_map(|id| self.bee(*id).map(|bee| (*id, bee.stats().clone())))
            .collect()
    }

    pub fn stepper(&self) -> Option<&PhysicsStepper> {
        self.scheduler.model::<PhysicsStepper>(self.stepper)
    }

    /// Fault-injection handle, when the network is enabled.
    pub fn network(&self) -> Option<&SimNetworkBackend> {
        self.network.as_ref()
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.scheduler.now().as_secs_f64()
    }

    pub fn bee_count(&self) -> usize {
        self.bees.len()
    }
}
