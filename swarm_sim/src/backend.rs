//! Simulated network backend with fault injection.
//!
//! Stands in for an external packet-level network simulator behind the
//! [`TokioBridge`](swarm_env::TokioBridge). Every delivery is delayed by the
//! link latency plus the time to clock the packet out at the configured data
//! rate; links can be lossy, partitioned, or out of range.

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use swarm_env::{
    BridgeRequest, Destination, EnvError, ModelId, NetworkBackend, NsDelivery, SimDuration,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Link defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Latency of links without an override (ms)
    pub base_latency_ms: u64,

    /// Serialization rate (kbit/s)
    pub data_rate_kbps: f64,

    /// Loss probability of links without an override
    pub loss_rate: f64,

    /// Nodes farther apart than this never hear each other (m)
    pub range_m: Option<f64>,

    /// Wall-clock time the backend spends per packet
    pub processing_delay_ms: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 5,
            data_rate_kbps: 250.0,
            loss_rate: 0.0,
            range_m: Some(100.0),
            processing_delay_ms: None,
        }
    }
}

/// Running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub packets: u64,
    pub delivered: u64,
    pub dropped_loss: u64,
    pub dropped_partition: u64,
    pub dropped_range: u64,
    pub max_latency_ms: u64,
}

/// Network backend. Clones share state, so a scenario can keep a handle for
/// fault injection after the backend has moved into the bridge.
#[derive(Clone)]
pub struct SimNetworkBackend {
    config: NetworkConfig,

    /// Per-link latency in milliseconds
    link_latency: Arc<Mutex<HashMap<(ModelId, ModelId), u64>>>,

    /// Per-link packet loss rate (0.0 - 1.0)
    link_loss: Arc<Mutex<HashMap<(ModelId, ModelId), f64>>>,

    /// Active partitions (groups that cannot communicate)
    partitions: Arc<Mutex<Vec<(Vec<ModelId>, Vec<ModelId>)>>>,

    /// Loss rolls; seeded so runs repeat
    rng: Arc<Mutex<ChaCha8Rng>>,

    stats: Arc<Mutex<BackendStats>>,
}

impl SimNetworkBackend {
    pub fn new(network_seed: u64, config: NetworkConfig) -> Self {
        Self {
            config,
            link_latency: Arc::new(Mutex::new(HashMap::new())),
            link_loss: Arc::new(Mutex::new(HashMap::new())),
            partitions: Arc::new(Mutex::new(Vec::new())),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(network_seed))),
            stats: Arc::new(Mutex::new(BackendStats::default())),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Sets latency for a specific link.
    pub fn set_latency(&self, from: ModelId, to: ModelId, latency_ms: u64) {
        lock(&self.link_latency).insert((from, to), latency_ms);
    }

    /// Sets packet loss rate for a link.
    pub fn set_loss(&self, from: ModelId, to: ModelId, loss_rate: f64) {
        lock(&self.link_loss).insert((from, to), loss_rate.clamp(0.0, 1.0));
    }

    /// Creates a network partition between two groups.
    pub fn partition(&self, group_a: Vec<ModelId>, group_b: Vec<ModelId>) {
        lock(&self.partitions).push((group_a, group_b));
    }

    /// Heals all active partitions.
    pub fn heal_all(&self) {
        lock(&self.partitions).clear();
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: ModelId, to: ModelId) -> bool {
        !lock(&self.partitions).iter().any(|(a, b)| {
            (a.contains(&from) && b.contains(&to)) || (b.contains(&from) && a.contains(&to))
        })
    }

    pub fn latency(&self, from: ModelId, to: ModelId) -> u64 {
        lock(&self.link_latency)
            .get(&(from, to))
            .copied()
            .unwrap_or(self.config.base_latency_ms)
    }

    pub fn loss(&self, from: ModelId, to: ModelId) -> f64 {
        lock(&self.link_loss)
            .get(&(from, to))
            .copied()
            .unwrap_or(self.config.loss_rate)
    }

    pub fn stats(&self) -> BackendStats {
        *lock(&self.stats)
    }

    /// Time to clock `bytes` onto the link.
    pub fn serialization_delay(&self, bytes: usize) -> SimDuration {
        if self.config.data_rate_kbps <= 0.0 {
            return SimDuration::ZERO;
        }
        SimDuration::from_secs_f64(bytes as f64 * 8.0 / (self.config.data_rate_kbps * 1000.0))
    }

    /// Computes deliveries for one request. Receivers are visited in id order
    /// so loss rolls repeat for a given seed.
    pub fn deliveries(&self, request: &BridgeRequest) -> Vec<NsDelivery> {
        let packet = &request.packet;
        let positions: BTreeMap<ModelId, _> = request
            .nodes
            .iter()
            .map(|n| (n.model, n.position))
            .collect();
        let source_position = positions.get(&packet.source).copied();

        let targets: Vec<ModelId> = match packet.destination {
            Destination::Model(to) => vec![to],
            Destination::Broadcast => positions
                .keys()
                .copied()
                .filter(|m| *m != packet.source)
                .collect(),
        };

        let serialization = self.serialization_delay(packet.size());
        let mut stats = BackendStats {
            packets: 1,
            ..BackendStats::default()
        };
        let mut deliveries = Vec::new();

        for to in targets {
            if !self.can_communicate(packet.source, to) {
                stats.dropped_partition += 1;
                continue;
            }
            if let (Some(range), Some(from), Some(at)) = (self.config.range_m, source_position, positions.get(&to)) {
                if (at - from).norm() > range {
                    stats.dropped_range += 1;
                    continue;
                }
            }
            let loss = self.loss(packet.source, to);
            if loss > 0.0 && lock(&self.rng).gen::<f64>() < loss {
                stats.dropped_loss += 1;
                continue;
            }

            let latency_ms = self.latency(packet.source, to);
            stats.max_latency_ms = stats.max_latency_ms.max(latency_ms);
            deliveries.push(NsDelivery {
                payload: packet.payload.clone(),
                source: packet.source,
                destination: to,
                delivery_time: packet.tx_time + SimDuration::from_millis(latency_ms) + serialization,
            });
        }
        stats.delivered = deliveries.len() as u64;

        let mut totals = lock(&self.stats);
        totals.packets += stats.packets;
        totals.delivered += stats.delivered;
        totals.dropped_loss += stats.dropped_loss;
        totals.dropped_partition += stats.dropped_partition;
        totals.dropped_range += stats.dropped_range;
        totals.max_latency_ms = totals.max_latency_ms.max(stats.max_latency_ms);
        deliveries
    }
}

#[async_trait]
impl NetworkBackend for SimNetworkBackend {
    async fn simulate(&self, request: BridgeRequest) -> Result<Vec<NsDelivery>, EnvError> {
        if let Some(ms) = self.config.processing_delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let deliveries = self.deliveries(&request);
        tracing::trace!(
            source = %request.packet.source,
            delivered = deliveries.len(),
            "network backend simulated packet"
        );
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use swarm_env::{NodePlacement, NsPacket, SimTime};

    fn node(id: u64, x: f64) -> NodePlacement {
        NodePlacement {
            model: ModelId(id),
            position: Vector3::new(x, 0.0, 1.0),
        }
    }

    fn broadcast(from: u64, bytes: usize) -> BridgeRequest {
        BridgeRequest {
            packet: NsPacket::broadcast(vec![0u8; bytes], ModelId(from), SimTime::from_millis(100)),
            nodes: vec![node(1, 0.0), node(2, 10.0), node(3, 20.0), node(4, 500.0)],
        }
    }

    #[test]
    fn test_network_controller_partition() {
        let backend = SimNetworkBackend::new(1, NetworkConfig::default());
        let (a, b, c) = (ModelId(1), ModelId(2), ModelId(3));

        assert!(backend.can_communicate(a, b));
        backend.partition(vec![a], vec![b, c]);
        assert!(!backend.can_communicate(a, b));
        assert!(!backend.can_communicate(c, a));
        assert!(backend.can_communicate(b, c));

        backend.heal_all();
        assert!(backend.can_communicate(a, b));
    }

    #[test]
    fn test_broadcast_latency_and_range() {
        let backend = SimNetworkBackend::new(1, NetworkConfig::default());
        let deliveries = backend.deliveries(&broadcast(1, 250));

        let targets: Vec<ModelId> = deliveries.iter().map(|d| d.destination).collect();
        assert_eq!(targets, vec![ModelId(2), ModelId(3)]);
        // 5 ms latency + 8 ms to clock out 250 bytes at 250 kbps
        assert!(deliveries
            .iter()
            .all(|d| d.delivery_time == SimTime::from_millis(113)));

        let stats = backend.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped_range, 1);
    }

    #[test]
    fn test_link_overrides() {
        let backend = SimNetworkBackend::new(1, NetworkConfig::default());
        backend.set_latency(ModelId(1), ModelId(3), 40);
        backend.set_loss(ModelId(1), ModelId(2), 1.0);

        let deliveries = backend.deliveries(&broadcast(1, 0));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].destination, ModelId(3));
        assert_eq!(deliveries[0].delivery_time, SimTime::from_millis(140));
        assert_eq!(backend.stats().dropped_loss, 1);
        assert_eq!(backend.stats().max_latency_ms, 40);
    }

    #[test]
    fn test_loss_is_seeded() {
        let config = NetworkConfig {
            loss_rate: 0.5,
            range_m: None,
            ..NetworkConfig::default()
        };
        let run = |seed| {
            let backend = SimNetworkBackend::new(seed, config.clone());
            (0..50)
                .map(|_| backend.deliveries(&broadcast(1, 10)).len())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
        let total: usize = run(9).iter().sum();
        // 150 coin flips
        assert!(total > 30 && total < 120);
    }

    #[test]
    fn test_unicast_to_unplaced_node_still_delivers() {
        let backend = SimNetworkBackend::new(1, NetworkConfig::default());
        let request = BridgeRequest {
            packet: NsPacket::unicast(b"hi".to_vec(), ModelId(1), ModelId(9), SimTime::from_millis(1)),
            nodes: vec![node(1, 0.0)],
        };
        let deliveries = backend.deliveries(&request);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].destination, ModelId(9));
    }

    #[tokio::test]
    async fn test_simulate_matches_deliveries() {
        let backend = SimNetworkBackend::new(1, NetworkConfig::default());
        let handle = backend.clone();
        let deliveries = backend.simulate(broadcast(2, 10)).await.unwrap();

        assert_eq!(deliveries.len(), 2);
        // Clones share counters
        assert_eq!(handle.stats().packets, 1);
    }
}
