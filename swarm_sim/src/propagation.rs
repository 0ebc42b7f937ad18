//! Free-space radio propagation.
//!
//! Received power follows Friis:
//!
//! ```text
//! P_rx = P_tx + G_tx + G_rx - FSPL
//! FSPL = 20·log10(d_m) + 20·log10(f_MHz) - 27.55
//! ```
//!
//! Receptions below the sensitivity threshold are dropped. Each surviving
//! reception arrives after the light-speed delay over the path.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use swarm_core::{antenna_normal, RadioConfig};
use swarm_env::{
    AntennaPattern, ModelId, ObjectId, PhysicsWorld, PropagationModel, Reception, SimDuration, Transmission,
};

/// Speed of light (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Paths shorter than this (m) are evaluated at this distance.
const MIN_DISTANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Weakest signal a receiver can decode (dBm)
    pub sensitivity_dbm: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self { sensitivity_dbm: -95.0 }
    }
}

/// Receiving antenna as mounted on its body.
#[derive(Debug, Clone, PartialEq)]
struct Receiver {
    object: ObjectId,
    offset: Vector3<f64>,
    pointing: Vector3<f64>,
    normal: Vector3<f64>,
    pattern: AntennaPattern,
}

/// Free-space path loss in dB.
pub fn free_space_path_loss_db(distance_m: f64, frequency_mhz: f64) -> f64 {
    20.0 * distance_m.max(MIN_DISTANCE).log10() + 20.0 * frequency_mhz.log10() - 27.55
}

/// Propagation model over a physics world. Radios must be registered to be
/// heard.
pub struct FreeSpacePropagation {
    world: Arc<dyn PhysicsWorld>,
    config: PropagationConfig,
    receivers: Mutex<BTreeMap<ModelId, Receiver>>,
}

impl FreeSpacePropagation {
    pub fn new(world: Arc<dyn PhysicsWorld>, config: PropagationConfig) -> Self {
        Self {
            world,
            config,
            receivers: Mutex::new(BTreeMap::new()),
        }
    }

    fn receivers(&self) -> MutexGuard<'_, BTreeMap<ModelId, Receiver>> {
        self.receivers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Registers the radio `model` carries on `object`. Re-registering
    /// replaces the old antenna.
    pub fn register(&self, model: ModelId, object: ObjectId, radio: &RadioConfig) {
        self.receivers().insert(
            model,
            Receiver {
                object,
                offset: radio.offset,
                pointing: radio.pointing,
                normal: antenna_normal(&radio.pointing, radio.roll),
                pattern: radio.pattern,
            },
        );
    }

    pub fn unregister(&self, model: ModelId) -> bool {
        self.receivers().remove(&model).is_some()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers().len()
    }

    /// Power (dBm) a receiver would see, before the sensitivity cut.
    fn rx_power(&self, tx: &Transmission, receiver: &Receiver, rx_position: &Vector3<f64>, rx_pointing: &Vector3<f64>, rx_normal: &Vector3<f64>) -> f64 {
        let outbound = rx_position - tx.position;
        let g_tx = tx.pattern.gain_dbi(&tx.pointing, &tx.normal, &outbound);
        let g_rx = receiver.pattern.gain_dbi(rx_pointing, rx_normal, &-outbound);
        tx.tx_power_dbm + g_tx + g_rx - free_space_path_loss_db(outbound.norm(), tx.frequency_mhz)
    }
}

impl PropagationModel for FreeSpacePropagation {
    fn propagate(&self, tx: &Transmission) -> Vec<Reception> {
        let receivers = self.receivers();
        let mut receptions = Vec::new();

        for (model, receiver) in receivers.iter() {
            if *model == tx.source {
                continue;
            }
            let Some(state) = self.world.body_state(receiver.object) else {
                tracing::debug!(receiver = %model, object = %receiver.object, "receiver body gone");
                continue;
            };
            let position = state.position + state.to_world(&receiver.offset);
            let pointing = state.to_world(&receiver.pointing);
            let normal = state.to_world(&receiver.normal);

            let power = self.rx_power(tx, receiver, &position, &pointing, &normal);
            if power < self.config.sensitivity_dbm {
                continue;
            }

            let distance = (position - tx.position).norm();
            receptions.push(Reception {
                time: tx.time + SimDuration::from_secs_f64(distance / SPEED_OF_LIGHT),
                receiver: *model,
                payload: tx.payload.clone(),
                rx_power_dbm: power,
                frequency_mhz: tx.frequency_mhz,
            });
        }
        receptions
    }
}
