//! Swarm Environment Abstraction Layer
//!
//! This crate holds the vocabulary shared by the simulation kernel and the
//! collaborators it talks to, without depending on either side's internals:
//! - Simulated time (`SimTime`, `SimDuration`, `TimeUnit`)
//! - Identity (`ModelId` for simulation participants, `ObjectId` for physics bodies)
//! - Collaborator contracts (`PhysicsWorld`, `WorldMap`, `PropagationModel`,
//!   `Aggregator`, `NetworkBridge`)
//!
//! # Layering
//!
//! ```text
//! swarm_sim  (reference collaborators, scenarios, CLI)
//!     │
//! swarm_core (scheduler, timers, clock, radio, sensor)
//!     │
//! swarm_env  (this crate: ids, time, traits)
//! ```
//!
//! The kernel only ever sees the traits, so a test can swap the kinematic
//! world for a scripted one and a real network simulator can sit behind
//! `NetworkBridge` without the kernel noticing.

mod error;
mod network;
mod physics;
mod propagation;
mod telemetry;
mod time;
mod tokio_impl;
mod types;

pub use error::EnvError;
pub use network::{BridgeRequest, NetworkBackend, NetworkBridge, NodePlacement};
pub use physics::{
    Actuation, BodyState, BoundingSphere, Contact, PhysicsWorld, RayHit, WorldMap, WorldObject,
};
pub use propagation::{AntennaPattern, PropagationModel, Reception, Transmission};
pub use telemetry::{Aggregator, NullAggregator};
pub use time::{SimDuration, SimTime, TimeUnit};
pub use tokio_impl::TokioBridge;
pub use types::{Destination, ModelId, NsDelivery, NsPacket, ObjectId};
