//! Radio propagation contract.

use crate::time::SimTime;
use crate::types::ModelId;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Directional gain characteristic of an antenna.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum AntennaPattern {
    /// Equal gain in every direction
    #[default]
    Isotropic,

    /// Half-wave dipole along the pointing vector: a doughnut with nulls off
    /// the ends of the antenna
    Dipole,
}

impl AntennaPattern {
    /// Peak gain of a half-wave dipole.
    const DIPOLE_PEAK_DBI: f64 = 2.15;

    /// Gain floor for directions inside a pattern null.
    const NULL_FLOOR_DBI: f64 = -40.0;

    /// Gain (dBi) toward `direction`, given the antenna's world-frame
    /// pointing and normal vectors.
    pub fn gain_dbi(&self, pointing: &Vector3<f64>, _normal: &Vector3<f64>, direction: &Vector3<f64>) -> f64 {
        match self {
            AntennaPattern::Isotropic => 0.0,
            AntennaPattern::Dipole => {
                let (p, d) = (pointing.norm(), direction.norm());
                if p == 0.0 || d == 0.0 {
                    return Self::DIPOLE_PEAK_DBI;
                }
                let cos_theta = (pointing.dot(direction) / (p * d)).clamp(-1.0, 1.0);
                let sin_sq = 1.0 - cos_theta * cos_theta;
                if sin_sq <= 1e-4 {
                    Self::NULL_FLOOR_DBI
                } else {
                    (Self::DIPOLE_PEAK_DBI + 10.0 * sin_sq.log10()).max(Self::NULL_FLOOR_DBI)
                }
            }
        }
    }
}

/// Everything a propagation model needs to know about one transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transmission {
    /// Model whose radio is transmitting
    pub source: ModelId,

    /// Simulated time the transmission starts
    pub time: SimTime,

    /// Antenna position (world frame)
    pub position: Vector3<f64>,

    /// Antenna pointing vector (world frame)
    pub pointing: Vector3<f64>,

    /// Antenna normal vector (world frame)
    pub normal: Vector3<f64>,

    pub pattern: AntennaPattern,
    pub tx_power_dbm: f64,
    pub frequency_mhz: f64,
    pub payload: Vec<u8>,
}

/// A transmission as heard by one receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reception {
    pub time: SimTime,
    pub receiver: ModelId,
    pub payload: Vec<u8>,
    pub rx_power_dbm: f64,
    pub frequency_mhz: f64,
}

/// Translates a transmission's geometry and power into receptions.
pub trait PropagationModel: Send + Sync {
    /// Returns zero or more receptions. The transmitter itself is never a
    /// receiver, and no reception may precede `tx.time`.
    fn propagate(&self, tx: &Transmission) -> Vec<Reception>;
}
