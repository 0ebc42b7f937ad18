//! Common identity and packet types.

use crate::time::SimTime;
use serde::{Deserialize, Serialize};

/// Identifier of a simulation participant (a model).
///
/// Assigned by the scheduler at registration; unique for the lifetime of a
/// simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelId(pub u64);

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Identifier of a body in the physics world.
///
/// Lives in its own namespace: an embodied model has both a `ModelId` and an
/// `ObjectId`, and the two are unrelated numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Addressing for a network-simulator packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Model(ModelId),
    Broadcast,
}

/// A packet handed to the external network simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NsPacket {
    /// Application payload
    pub payload: Vec<u8>,

    /// Sending model
    pub source: ModelId,

    /// Receiving model, or everyone
    pub destination: Destination,

    /// When the packet should leave the sender
    pub tx_time: SimTime,
}

impl NsPacket {
    /// Creates a unicast packet.
    pub fn unicast(payload: impl Into<Vec<u8>>, source: ModelId, to: ModelId, tx_time: SimTime) -> Self {
        Self {
            payload: payload.into(),
            source,
            destination: Destination::Model(to),
            tx_time,
        }
    }

    /// Creates a broadcast packet.
    pub fn broadcast(payload: impl Into<Vec<u8>>, source: ModelId, tx_time: SimTime) -> Self {
        Self {
            payload: payload.into(),
            source,
            destination: Destination::Broadcast,
            tx_time,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// A packet the network simulator reports as delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NsDelivery {
    pub payload: Vec<u8>,
    pub source: ModelId,
    pub destination: ModelId,
    /// Simulated time at which the last bit arrived
    pub delivery_time: SimTime,
}
