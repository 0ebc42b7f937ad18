//! Physics world contract.
//!
//! The kernel never integrates motion itself. It reads body state, casts
//! rays, and pushes forces through these traits; whatever engine sits behind
//! them is authoritative.

use crate::error::EnvError;
use crate::types::ObjectId;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A point where a body touches another object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Contact location in the body frame of the queried body
    pub body_point: Vector3<f64>,

    /// Contact location in the world frame
    pub world_point: Vector3<f64>,

    /// The object being touched
    pub other: ObjectId,
}

/// Sphere enclosing a body, in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vector3<f64>,
    pub radius: f64,
}

/// Snapshot of a body's kinematic and dynamic state. All vectors are in the
/// world frame unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    pub object: ObjectId,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
    pub linear_acceleration: Vector3<f64>,
    pub angular_acceleration: Vector3<f64>,

    /// Forces accumulated since the last clear
    pub force: Vector3<f64>,

    /// Torques accumulated since the last clear
    pub torque: Vector3<f64>,

    pub bounding_sphere: BoundingSphere,
    pub contacts: Vec<Contact>,
}

impl BodyState {
    /// Creates a resting body at `position` with identity orientation.
    pub fn at_rest(object: ObjectId, position: Vector3<f64>, radius: f64) -> Self {
        Self {
            object,
            position,
            orientation: UnitQuaternion::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            linear_acceleration: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
            bounding_sphere: BoundingSphere { center: position, radius },
            contacts: Vec::new(),
        }
    }

    /// Rotates a body-frame vector into the world frame.
    pub fn to_world(&self, body_vector: &Vector3<f64>) -> Vector3<f64> {
        self.orientation * body_vector
    }
}

/// One intersection along a ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayHit {
    pub object: ObjectId,

    /// Position along the ray, 0 at `from`, 1 at `to`
    pub fraction: f64,
}

/// Something a model can do to a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Actuation {
    /// Continuous force, optionally applied at a body-frame offset (which
    /// also induces torque)
    Force {
        force: Vector3<f64>,
        offset: Option<Vector3<f64>>,
    },

    /// Instantaneous change in momentum, optionally at a body-frame offset
    Impulse {
        impulse: Vector3<f64>,
        offset: Option<Vector3<f64>>,
    },

    Torque(Vector3<f64>),
    TorqueImpulse(Vector3<f64>),

    /// Drop accumulated forces and torques
    ClearForces,

    /// Zero all velocities
    ClearMotion,

    /// Move the body without simulating the path
    SetPosition(Vector3<f64>),
}

/// A static object of interest in the world (a flower, a hive, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    pub object: ObjectId,
    pub kind: String,
    pub position: Vector3<f64>,
    pub radius: f64,
}

/// The rigid-body physics engine, seen from the kernel.
pub trait PhysicsWorld: Send + Sync {
    /// Casts a ray and returns every intersection ordered by increasing
    /// fraction.
    fn ray_test(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vec<RayHit>;

    /// Returns the authoritative state of a body, or `None` if unknown.
    fn body_state(&self, object: ObjectId) -> Option<BodyState>;

    /// Applies a force, impulse, torque, or reset to a body.
    fn actuate(&self, object: ObjectId, actuation: Actuation) -> Result<(), EnvError>;
}

/// Static layout of the world: terrain and objects of interest.
pub trait WorldMap: Send + Sync {
    /// The object id of the terrain rays are measured against.
    fn ground_object(&self) -> ObjectId;

    /// Objects whose horizontal projection lies within `radius` of `center`.
    fn objects_within(&self, center: &Vector3<f64>, radius: f64) -> Vec<WorldObject>;
}
