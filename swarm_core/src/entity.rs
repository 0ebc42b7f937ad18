//! Proxy onto a body owned by the physics world.

use crate::error::SimError;
use nalgebra::{UnitQuaternion, Vector3};
use std::fmt;
use std::sync::Arc;
use swarm_env::{Actuation, BodyState, BoundingSphere, Contact, ObjectId, PhysicsWorld};

/// Non-owning handle to a physical body.
///
/// Every read goes to the world, so values are always current. Writes are
/// forwarded as [`Actuation`]s; the world decides what they do.
#[derive(Clone)]
pub struct PhysicalEntity {
    object: ObjectId,
    world: Arc<dyn PhysicsWorld>,
}

impl PhysicalEntity {
    pub fn new(object: ObjectId, world: Arc<dyn PhysicsWorld>) -> Self {
        Self { object, world }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn world(&self) -> &Arc<dyn PhysicsWorld> {
        &self.world
    }

    /// Full state snapshot.
    ///
    /// # Errors
    /// `UnknownObject` if the world no longer has this body.
    pub fn state(&self) -> Result<BodyState, SimError> {
        self.world
            .body_state(self.object)
            .ok_or(SimError::UnknownObject(self.object))
    }

    pub fn position(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.state()?.position)
    }

    pub fn orientation(&self) -> Result<UnitQuaternion<f64>, SimError> {
        Ok(self.state()?.orientation)
    }

    pub fn linear_velocity(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.state()?.linear_velocity)
    }

    pub fn angular_velocity(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.state()?.angular_velocity)
    }

    pub fn linear_acceleration(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.state()?.linear_acceleration)
    }

    pub fn angular_acceleration(&self) -> Result<Vector3<f64>, SimError> {
        Ok(self.state()?.angular_acceleration)
    }

    pub fn bounding_sphere(&self) -> Result<BoundingSphere, SimError> {
        Ok(self.state()?.bounding_sphere)
    }

    /// Contacts with body-frame points.
    pub fn contact_points(&self) -> Result<Vec<Contact>, SimError> {
        Ok(self.state()?.contacts)
    }

    /// World-frame position of a body-frame offset.
    pub fn point_to_world(&self, offset: &Vector3<f64>) -> Result<Vector3<f64>, SimError> {
        let state = self.state()?;
        Ok(state.position + state.to_world(offset))
    }

    fn actuate(&self, actuation: Actuation) -> Result<(), SimError> {
        self.world.actuate(self.object, actuation)?;
        Ok(())
    }

    pub fn apply_force(&self, force: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::Force { force, offset: None })
    }

    /// Force at a body-frame offset; also produces torque.
    pub fn apply_force_at(&self, force: Vector3<f64>, offset: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::Force {
            force,
            offset: Some(offset),
        })
    }

    pub fn apply_impulse(&self, impulse: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::Impulse { impulse, offset: None })
    }

    pub fn apply_impulse_at(&self, impulse: Vector3<f64>, offset: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::Impulse {
            impulse,
            offset: Some(offset),
        })
    }

    pub fn apply_torque(&self, torque: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::Torque(torque))
    }

    pub fn apply_torque_impulse(&self, torque: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::TorqueImpulse(torque))
    }

    pub fn clear_forces(&self) -> Result<(), SimError> {
        self.actuate(Actuation::ClearForces)
    }

    pub fn clear_motion(&self) -> Result<(), SimError> {
        self.actuate(Actuation::ClearMotion)
    }

    pub fn set_position(&self, position: Vector3<f64>) -> Result<(), SimError> {
        self.actuate(Actuation::SetPosition(position))
    }
}

impl fmt::Debug for PhysicalEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalEntity")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

/// Fixed-state world used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use swarm_env::{EnvError, RayHit};

    #[derive(Default)]
    pub struct StaticWorld {
        pub bodies: Mutex<Vec<BodyState>>,
        pub hits: Mutex<Vec<RayHit>>,
        pub actuations: Mutex<Vec<(ObjectId, Actuation)>>,
    }

    impl StaticWorld {
        pub fn with_body(state: BodyState) -> Arc<Self> {
            let world = Self::default();
            world.bodies.lock().unwrap().push(state);
            Arc::new(world)
        }

        pub fn add_body(&self, state: BodyState) {
            self.bodies.lock().unwrap().push(state);
        }

        pub fn set_hits(&self, hits: Vec<RayHit>) {
            *self.hits.lock().unwrap() = hits;
        }
    }

    impl PhysicsWorld for StaticWorld {
        fn ray_test(&self, _from: &Vector3<f64>, _to: &Vector3<f64>) -> Vec<RayHit> {
            self.hits.lock().unwrap().clone()
        }

        fn body_state(&self, object: ObjectId) -> Option<BodyState> {
            self.bodies
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.object == object)
                .cloned()
        }

        fn actuate(&self, object: ObjectId, actuation: Actuation) -> Result<(), EnvError> {
            if self.body_state(object).is_none() {
                return Err(EnvError::UnknownObject(object));
            }
            self.actuations.lock().unwrap().push((object, actuation));
            Ok(())
        }
    }
}
