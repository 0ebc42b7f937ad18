//! Kinematic world - the ground truth every embodied model reads from.
//!
//! Bodies are spheres with mass. Forces and torques pushed through
//! [`PhysicsWorld::actuate`] accumulate until the next [`KinematicWorld::step`],
//! which integrates them with semi-implicit Euler and then clears them. The
//! ground is the plane `z = 0` (object 0); no body sinks below it.
//!
//! Flowers and other static objects live in the same id space as bodies but
//! never move and have no collision volume.

use crate::error::HarnessError;
use nalgebra::{UnitQuaternion, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use swarm_core::FLOWER_KIND;
use swarm_env::{
    Actuation, BodyState, BoundingSphere, Contact, EnvError, ObjectId, PhysicsWorld, RayHit, WorldMap, WorldObject,
};

/// The ground plane.
pub const GROUND: ObjectId = ObjectId(0);

/// Gap (m) below which two surfaces count as touching.
pub const CONTACT_TOLERANCE: f64 = 1e-3;

/// Radius given to flowers placed by `scatter_flowers` (m).
pub const FLOWER_RADIUS: f64 = 0.03;

/// A rigid sphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub object: ObjectId,

    /// Mass in kg
    pub mass: f64,

    /// Collision radius in m
    pub radius: f64,

    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,

    /// Acceleration over the last step
    pub linear_acceleration: Vector3<f64>,
    pub angular_acceleration: Vector3<f64>,

    /// Accumulated since the last step or clear
    pub force: Vector3<f64>,
    pub torque: Vector3<f64>,
}

impl Body {
    pub fn new(object: ObjectId, position: Vector3<f64>, radius: f64, mass: f64) -> Self {
        Self {
            object,
            mass,
            radius,
            position,
            orientation: UnitQuaternion::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            linear_acceleration: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }

    /// Moment of inertia of a solid sphere.
    fn inertia(&self) -> f64 {
        0.4 * self.mass * self.radius * self.radius
    }

    fn apply(&mut self, actuation: Actuation) {
        match actuation {
            Actuation::Force { force, offset } => {
                self.force += force;
                if let Some(offset) = offset {
                    self.torque += (self.orientation * offset).cross(&force);
                }
            }
            Actuation::Impulse { impulse, offset } => {
                self.linear_velocity += impulse / self.mass;
                if let Some(offset) = offset {
                    self.angular_velocity += (self.orientation * offset).cross(&impulse) / self.inertia();
                }
            }
            Actuation::Torque(torque) => self.torque += torque,
            Actuation::TorqueImpulse(impulse) => self.angular_velocity += impulse / self.inertia(),
            Actuation::ClearForces => {
                self.force = Vector3::zeros();
                self.torque = Vector3::zeros();
            }
            Actuation::ClearMotion => {
                self.linear_velocity = Vector3::zeros();
                self.angular_velocity = Vector3::zeros();
                self.linear_acceleration = Vector3::zeros();
                self.angular_acceleration = Vector3::zeros();
            }
            Actuation::SetPosition(position) => self.position = position,
        }
    }

    /// Semi-implicit Euler: velocity first, then position from the new velocity.
    fn integrate(&mut self, dt: f64) {
        self.linear_acceleration = self.force / self.mass;
        self.linear_velocity += self.linear_acceleration * dt;
        self.position += self.linear_velocity * dt;

        self.angular_acceleration = self.torque / self.inertia();
        self.angular_velocity += self.angular_acceleration * dt;
        self.orientation = UnitQuaternion::from_scaled_axis(self.angular_velocity * dt) * self.orientation;

        if self.position.z < self.radius {
            self.position.z = self.radius;
            self.linear_velocity.z = self.linear_velocity.z.max(0.0);
        }

        self.force = Vector3::zeros();
        self.torque = Vector3::zeros();
    }

    fn contact_at(&self, world_point: Vector3<f64>, other: ObjectId) -> Contact {
        Contact {
            body_point: self.orientation.inverse() * (world_point - self.position),
            world_point,
            other,
        }
    }
}

struct WorldState {
    bodies: BTreeMap<ObjectId, Body>,
    objects: Vec<WorldObject>,
    next_object: u64,
    time: f64,
    steps: u64,

    /// Placement randomness only; integration is deterministic
    rng: ChaCha8Rng,
}

impl WorldState {
    fn allocate(&mut self) -> ObjectId {
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        id
    }

    fn contacts(&self, body: &Body) -> Vec<Contact> {
        let mut contacts = Vec::new();
        if body.position.z - body.radius <= CONTACT_TOLERANCE {
            let touch = Vector3::new(body.position.x, body.position.y, 0.0);
            contacts.push(body.contact_at(touch, GROUND));
        }
        for other in self.bodies.values().filter(|o| o.object != body.object) {
            let between = other.position - body.position;
            let distance = between.norm();
            if distance > 0.0 && distance <= body.radius + other.radius + CONTACT_TOLERANCE {
                let touch = body.position + between / distance * body.radius;
                contacts.push(body.contact_at(touch, other.object));
            }
        }
        contacts
    }
}

/// Shared, thread-safe kinematic world.
pub struct KinematicWorld {
    physics_seed: u64,
    state: Mutex<WorldState>,
}

impl KinematicWorld {
    /// Creates an empty world. `physics_seed` drives object placement.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_seed,
            state: Mutex::new(WorldState {
                bodies: BTreeMap::new(),
                objects: Vec::new(),
                next_object: GROUND.0 + 1,
                time: 0.0,
                steps: 0,
                rng: ChaCha8Rng::seed_from_u64(physics_seed),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    /// Adds a sphere at rest and returns its id.
    pub fn add_body(&self, position: Vector3<f64>, radius: f64, mass: f64) -> Result<ObjectId, HarnessError> {
        if !(radius > 0.0 && mass > 0.0) {
            return Err(HarnessError::config(format!(
                "body needs positive radius and mass, got r={radius} m={mass}"
            )));
        }
        let mut state = self.state();
        let id = state.allocate();
        state.bodies.insert(id, Body::new(id, position, radius, mass));
        Ok(id)
    }

    /// Places a static object on the ground.
    pub fn add_object(&self, kind: &str, x: f64, y: f64, radius: f64) -> ObjectId {
        let mut state = self.state();
        let id = state.allocate();
        state.objects.push(WorldObject {
            object: id,
            kind: kind.to_string(),
            position: Vector3::new(x, y, 0.0),
            radius,
        });
        id
    }

    pub fn add_flower(&self, x: f64, y: f64) -> ObjectId {
        self.add_object(FLOWER_KIND, x, y, FLOWER_RADIUS)
    }

    /// Scatters `count` flowers uniformly over the square
    /// `[-half_extent, half_extent]²`.
    pub fn scatter_flowers(&self, count: usize, half_extent: f64) -> Vec<ObjectId> {
        if count == 0 || half_extent <= 0.0 {
            return Vec::new();
        }
        let spread = Uniform::new_inclusive(-half_extent, half_extent);
        let placements: Vec<(f64, f64)> = {
            let mut state = self.state();
            (0..count)
                .map(|_| (spread.sample(&mut state.rng), spread.sample(&mut state.rng)))
                .collect()
        };
        placements
            .into_iter()
            .map(|(x, y)| self.add_flower(x, y))
            .collect()
    }

    /// Advances every body by `dt` seconds.
    pub fn step(&self, dt: f64) {
        let mut state = self.state();
        for body in state.bodies.values_mut() {
            body.integrate(dt);
        }
        state.time += dt;
        state.steps += 1;
    }

    /// Seconds integrated so far.
    pub fn time(&self) -> f64 {
        self.state().time
    }

    pub fn steps(&self) -> u64 {
        self.state().steps
    }

    pub fn body(&self, object: ObjectId) -> Option<Body> {
        self.state().bodies.get(&object).cloned()
    }

    pub fn body_count(&self) -> usize {
        self.state().bodies.len()
    }

    /// Positions of every body, in id order.
    pub fn positions(&self) -> Vec<(ObjectId, Vector3<f64>)> {
        self.state()
            .bodies
            .values()
            .map(|b| (b.object, b.position))
            .collect()
    }

    pub fn objects(&self) -> Vec<WorldObject> {
        self.state().objects.clone()
    }
}

impl PhysicsWorld for KinematicWorld {
    fn ray_test(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vec<RayHit> {
        let state = self.state();
        let mut hits = Vec::new();

        if from.z >= 0.0 && to.z <= 0.0 && from.z != to.z {
            hits.push(RayHit {
                object: GROUND,
                fraction: from.z / (from.z - to.z),
            });
        }

        let d = to - from;
        let a = d.dot(&d);
        if a > 0.0 {
            for body in state.bodies.values() {
                let m = from - body.position;
                let c = m.dot(&m) - body.radius * body.radius;
                // Rays starting inside a body do not see it
                if c <= 0.0 {
                    continue;
                }
                let b = m.dot(&d);
                let disc = b * b - a * c;
                if disc < 0.0 {
                    continue;
                }
                let t = (-b - disc.sqrt()) / a;
                if (0.0..=1.0).contains(&t) {
                    hits.push(RayHit {
                        object: body.object,
                        fraction: t,
                    });
                }
            }
        }

        hits.sort_by(|x, y| x.fraction.total_cmp(&y.fraction));
        hits
    }

    fn body_state(&self, object: ObjectId) -> Option<BodyState> {
        let state = self.state();
        let body = state.bodies.get(&object)?;
        Some(BodyState {
            object,
            position: body.position,
            orientation: body.orientation,
            linear_velocity: body.linear_velocity,
            angular_velocity: body.angular_velocity,
            linear_acceleration: body.linear_acceleration,
            angular_acceleration: body.angular_acceleration,
            force: body.force,
            torque: body.torque,
            bounding_sphere: BoundingSphere {
                center: body.position,
                radius: body.radius,
            },
            contacts: state.contacts(body),
        })
    }

    fn actuate(&self, object: ObjectId, actuation: Actuation) -> Result<(), EnvError> {
        let mut state = self.state();
        let body = state
            .bodies
            .get_mut(&object)
            .ok_or(EnvError::UnknownObject(object))?;
        body.apply(actuation);
        Ok(())
    }
}

impl WorldMap for KinematicWorld {
    fn ground_object(&self) -> ObjectId {
        GROUND
    }

    fn objects_within(&self, center: &Vector3<f64>, radius: f64) -> Vec<WorldObject> {
        self.state()
            .objects
            .iter()
            .filter(|o| (o.position.xy() - center.xy()).norm() <= radius)
            .cloned()
            .collect()
    }
}
