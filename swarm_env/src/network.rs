//! Network-simulator bridge abstraction.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{ModelId, NsDelivery, NsPacket};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Position of one participant at the moment a packet is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePlacement {
    pub model: ModelId,
    pub position: Vector3<f64>,
}

/// One packet plus the topology snapshot it should be simulated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub packet: NsPacket,
    pub nodes: Vec<NodePlacement>,
}

/// Synchronous request/response view of an external network simulator.
///
/// The calling handler blocks (with the simulated clock paused) until the
/// deliveries come back or the implementation gives up.
///
/// # Packet Flow
///
/// ```text
/// NsInterface              Bridge                    Backend
///   |                         |                         |
///   |-- exchange(request) --->|-- simulate(request) --->|
///   |                         |<------ deliveries ------|
///   |<-- Ok(deliveries) ------|                         |
///   |   (or Err(Timeout))     |                         |
/// ```
pub trait NetworkBridge: Send + Sync {
    fn exchange(&self, request: BridgeRequest) -> Result<Vec<NsDelivery>, EnvError>;
}

/// The out-of-band side of the bridge: whatever actually computes
/// deliveries. Runs on the bridge's own runtime.
#[async_trait]
pub trait NetworkBackend: Send + Sync + 'static {
    /// Simulates one packet and returns the deliveries it produced.
    ///
    /// # Returns
    /// * `Ok(deliveries)` - possibly empty (nobody in range, packet lost)
    /// * `Err(EnvError::NetworkError)` - the backend could not run
    async fn simulate(&self, request: BridgeRequest) -> Result<Vec<NsDelivery>, EnvError>;
}
