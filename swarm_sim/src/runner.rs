//! Scenario runner - executes the canned scenarios and checks their outcome.

use crate::backend::BackendStats;
use crate::bee::Bee;
use crate::error::HarnessError;
use crate::exporter::{SimExport, SimFrame};
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use serde::Serialize;
use swarm_core::{Diagnostic, Platform, SimDuration, SimTime};
use tracing::{debug, info, warn};

/// Extra simulated time given to queues to drain after senders stop.
const DRAIN_GRACE: SimDuration = SimDuration::from_secs(1);

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Number of bees in the world
    pub bee_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            final_time_secs: 0.0,
            bee_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Events and timer fires dispatched
    pub dispatched: u64,

    pub beacons_queued: u64,
    pub beacons_rejected: u64,
    pub radio_messages: u64,
    pub ns_sent: u64,
    pub ns_received: u64,
    pub flower_sightings: u64,

    /// Bees that saw at least one flower
    pub foragers: usize,

    /// Radio energy by state (mA·s)
    pub energy_tx: f64,
    pub energy_rx: f64,
    pub energy_idle: f64,

    /// Events nobody handled
    pub unhandled: usize,

    /// Handlers and timer callbacks that returned an error
    pub handler_failures: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<BackendStats>,
}

impl ScenarioMetrics {
    /// Gathers totals from a finished world.
    pub fn collect(world: &SimWorld) -> Self {
        let mut metrics = Self {
            dispatched: world.scheduler.dispatched(),
            energy_tx: world.metrics.value("energy", "radio-tx"),
            energy_rx: world.metrics.value("energy", "radio-rx"),
            energy_idle: world.metrics.value("energy", "radio-idle"),
            network: world.network().map(|n| n.stats()),
            ..Self::default()
        };
        for (_, stats) in world.bee_stats() {
            metrics.beacons_queued += stats.beacons_queued;
            metrics.beacons_rejected += stats.beacons_rejected;
            metrics.radio_messages += stats.radio_messages;
            metrics.flower_sightings += stats.flower_sightings;
            if !stats.flowers_seen.is_empty() {
                metrics.foragers += 1;
            }
        }
        for bee in world.bees().iter().filter_map(|id| world.bee(*id)) {
            if let Some(ns) = bee.ns() {
                metrics.ns_sent += ns.packets_sent();
                metrics.ns_received += ns.packets_received();
            }
        }
        for diagnostic in world.scheduler.diagnostics() {
            match diagnostic {
                Diagnostic::Unhandled { .. } => metrics.unhandled += 1,
                Diagnostic::HandlerFailed { .. } => metrics.handler_failures += 1,
            }
        }
        metrics
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Base configuration each scenario adjusts
    config: SimConfig,

    /// Spacing of exported frames (ms)
    frame_interval_ms: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_bees: usize) -> Self {
        Self::with_config(SimConfig {
            seed,
            num_bees,
            ..SimConfig::default()
        })
    }

    /// Creates a runner from a full base configuration.
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            config,
            frame_interval_ms: 100,
        }
    }

    /// Sets the physics tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.config.tick_rate_hz = hz;
        self
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.config.max_duration_secs = secs;
        self
    }

    pub fn with_frame_interval_ms(mut self, ms: u64) -> Self {
        self.frame_interval_ms = ms.max(1);
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The configuration a scenario actually runs with.
    pub fn scenario_config(&self, scenario: ScenarioId) -> SimConfig {
        let mut config = self.config.clone();
        match scenario {
            ScenarioId::Chatter => {
                config.bee.beacon_interval_ms = Some(500);
                config.bee.sense_interval_ms = None;
            }
            ScenarioId::Forage => {
                config.flower_under_spawn = true;
                config.bee.beacon_interval_ms = None;
                config.bee.sense_interval_ms = Some(200);
            }
            ScenarioId::NsRelay => {
                config.use_network = true;
                config.bee.ns_hello = true;
                config.bee.beacon_interval_ms = None;
                config.bee.sense_interval_ms = None;
            }
            ScenarioId::Backpressure => {
                config.radio.send_queue_size = 4;
                config.bee.beacon_interval_ms = Some(500);
                config.bee.beacons_per_tick = 10;
                config.bee.sense_interval_ms = None;
            }
        }
        config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario, capturing a frame every `frame_interval_ms`.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.config.seed);
        let result = self.execute(scenario, Some(&mut export));
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);
        debug!("{}", scenario.description());

        match self.simulate(scenario, export) {
            Ok(result) => result,
            Err(e) => {
                warn!("scenario {} aborted: {}", scenario.name(), e);
                ScenarioResult::failed(scenario, self.config.seed, e.to_string())
            }
        }
    }

    fn simulate(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> Result<ScenarioResult, HarnessError> {
        let mut world = SimWorld::new(self.scenario_config(scenario))?;
        world.spawn_bees()?;

        let end = SimTime::ZERO + world.config.duration();
        match export.as_deref_mut() {
            Some(export) => {
                let step = SimDuration::from_millis(self.frame_interval_ms);
                loop {
                    let next = (world.scheduler.now() + step).min(end);
                    world.run_until(next)?;
                    export.add_frame(SimFrame::capture(&world));
                    if next >= end {
                        break;
                    }
                }
            }
            None => {
                world.run_until(end)?;
            }
        }

        if scenario == ScenarioId::Backpressure {
            let backlog = max_queue(&world);
            stop_senders(&mut world)?;
            world.scheduler.run_for(DRAIN_GRACE)?;
            if let Some(export) = export.as_deref_mut() {
                let frame = SimFrame::capture(&world).with_event(format!("senders stopped, backlog was {backlog}"), Some("info"));
                export.add_frame(frame);
            }
        }

        world.finish();
        let metrics = ScenarioMetrics::collect(&world);
        let failure_reason = check(scenario, &world, &metrics);
        let passed = failure_reason.is_none();

        if let Some(export) = export {
            export.finalize(passed, failure_reason.clone(), world.metrics.snapshot());
        }

        Ok(ScenarioResult {
            scenario,
            seed: self.config.seed,
            passed,
            final_time_secs: world.time(),
            bee_count: world.bee_count(),
            failure_reason,
            metrics,
        })
    }
}

/// Longest outgoing radio queue in the world.
fn max_queue(world: &SimWorld) -> usize {
    world
        .bees()
        .iter()
        .filter_map(|id| world.bee(*id))
        .filter_map(|bee| bee.radio().map(|r| r.queue_len()))
        .max()
        .unwrap_or(0)
}

fn stop_senders(world: &mut SimWorld) -> Result<(), HarnessError> {
    let ids = world.bees().to_vec();
    for id in ids {
        world
            .scheduler
            .invoke::<Bee, _, _>(id, |bee, ctx| bee.stop_beacons(ctx))??;
    }
    Ok(())
}

/// Returns why the run failed, if it did.
fn check(scenario: ScenarioId, world: &SimWorld, metrics: &ScenarioMetrics) -> Option<String> {
    if metrics.handler_failures > 0 || metrics.unhandled > 0 {
        return Some(format!(
            "{} handler failures, {} unhandled events",
            metrics.handler_failures, metrics.unhandled
        ));
    }
    let bees = world.bee_count();
    if bees == 0 {
        return Some("no bees spawned".to_string());
    }

    match scenario {
        ScenarioId::Chatter => {
            if metrics.energy_tx <= 0.0 {
                return Some("no radio energy billed".to_string());
            }
            let deaf = world
                .bee_stats()
                .into_iter()
                .filter(|(_, stats)| stats.heard_from.is_empty())
                .count();
            (bees > 1 && deaf > 0).then(|| format!("{deaf}/{bees} bees heard nobody"))
        }
        ScenarioId::Forage => {
            (metrics.foragers < bees).then(|| format!("only {}/{} bees saw a flower", metrics.foragers, bees))
        }
        ScenarioId::NsRelay => {
            let expected = (bees * (bees - 1)) as u64;
            if metrics.ns_sent != bees as u64 {
                Some(format!("{} of {} greetings sent", metrics.ns_sent, bees))
            } else if metrics.ns_received != expected {
                Some(format!("{} of {} greetings delivered", metrics.ns_received, expected))
            } else if world.scheduler.clock().is_paused() {
                Some("clock left paused after bridge exchanges".to_string())
            } else {
                None
            }
        }
        ScenarioId::Backpressure => {
            let capacity = world.config.radio.send_queue_size;
            if metrics.beacons_rejected == 0 {
                Some("no burst was rejected".to_string())
            } else if metrics.beacons_queued > 0 && metrics.energy_tx <= 0.0 {
                Some("queued beacons were never sent".to_string())
            } else {
                let backlog = max_queue(world);
                (backlog > 0).then(|| format!("queue still holds {backlog} of {capacity} after drain"))
            }
        }
    }
}
