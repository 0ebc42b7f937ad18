//! Swarm Sim - reference world and scenario harness for the swarm kernel
//!
//! The kernel in `swarm_core` only knows models, events and timers. This
//! crate supplies everything around it that a run needs:
//! - **Physics**: a kinematic world of sphere bodies over a flower meadow,
//!   stepped by a periodic timer model
//! - **Radio**: free-space propagation with antenna gains and light delay
//! - **Network**: a seeded latency/loss backend driven through the tokio bridge
//! - **Bees**: hovering, wandering models that beacon, sense and listen
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        SimWorld                        │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │ Scheduler (event queue, timers, ClockControl)    │  │
//! │  └──────────────────────────────────────────────────┘  │
//! │     │              │                 │                 │
//! │ ┌───▼────┐    ┌────▼───┐        ┌────▼───┐             │
//! │ │Stepper │    │  Bee   │◄──────►│  Bee   │  ...        │
//! │ └───┬────┘    └────┬───┘ radio  └────┬───┘             │
//! │     │              │   / NS bridge   │                 │
//! │ ┌───▼──────────────▼─────────────────▼──┐              │
//! │ │ KinematicWorld (bodies, flowers, rays) │              │
//! │ └────────────────────────────────────────┘              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swarm_sim::{SimConfig, SimWorld};
//!
//! let mut world = SimWorld::new(SimConfig { seed: 42, num_bees: 6, ..Default::default() })?;
//! world.spawn_bees()?;
//! world.run()?;
//! world.finish();
//! ```

pub mod backend;
pub mod bee;
pub mod error;
pub mod exporter;
pub mod kinematics;
pub mod propagation;
pub mod runner;
pub mod scenarios;
pub mod stepper;
pub mod telemetry;
pub mod world;

pub use backend::{BackendStats, NetworkConfig, SimNetworkBackend};
pub use bee::{Bee, BeeConfig, BeeStats};
pub use error::HarnessError;
pub use exporter::{BeeFrame, SimEvent, SimExport, SimFrame};
pub use kinematics::{Body, KinematicWorld};
pub use propagation::{FreeSpacePropagation, PropagationConfig};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use stepper::PhysicsStepper;
pub use telemetry::{MetricSample, MetricsAggregator};
pub use world::{SimConfig, SimWorld, BELLY_SENSOR};
