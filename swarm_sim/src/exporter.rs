//! JSON exporter for offline inspection of a run.

use crate::telemetry::MetricSample;
use crate::world::SimWorld;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use swarm_core::{ModelId, ObjectId, Platform};

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Every bee still in the world
    pub bees: Vec<BeeFrame>,

    /// Events (partitions, overflows, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<SimEvent>,
}

/// One bee at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeeFrame {
    pub model: u64,
    pub object: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Outgoing radio packets waiting
    pub queued: usize,

    /// Distinct peers heard so far
    pub heard: usize,

    /// Distinct flowers seen so far
    pub flowers: usize,
}

impl BeeFrame {
    pub fn new(model: ModelId, object: ObjectId, pos: Vector3<f64>) -> Self {
        Self {
            model: model.0,
            object: object.0,
            x: pos.x,
            y: pos.y,
            z: pos.z,
            queued: 0,
            heard: 0,
            flowers: 0,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimFrame {
    /// Captures every bee in `world` at the current time.
    pub fn capture(world: &SimWorld) -> Self {
        let bees = world
            .bees()
            .iter()
            .filter_map(|id| {
                let bee = world.bee(*id)?;
                let position = bee.body().position().ok()?;
                let stats = bee.stats();
                Some(BeeFrame {
                    queued: bee.radio().map_or(0, |r| r.queue_len()),
                    heard: stats.heard_from.len(),
                    flowers: stats.flowers_seen.len(),
                    ..BeeFrame::new(*id, bee.body().object(), position)
                })
            })
            .collect();
        Self {
            time_sec: world.time(),
            bees,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, message: impl Into<String>, level: Option<&str>) -> Self {
        self.events.push(SimEvent {
            message: message.into(),
            level: level.map(str::to_string),
        });
        self
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Aggregated metrics at the end of the run
    pub metrics: Vec<MetricSample>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            metrics: Vec::new(),
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, metrics: Vec<MetricSample>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.metrics = metrics;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
