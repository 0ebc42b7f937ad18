//! Downward-looking cone sensor that finds flowers on the ground.

use crate::entity::PhysicalEntity;
use crate::error::SimError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use swarm_env::{BodyState, WorldMap, WorldObject};

/// A contact this close to the sensor (body frame, m) blinds it.
pub const CONTACT_EPSILON: f64 = 0.01;

/// World object kind the sensor reports.
pub const FLOWER_KIND: &str = "flower";

/// Sensor mounting and field of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Mount point in the body frame
    pub offset: Vector3<f64>,

    /// View axis in the body frame
    pub pointing: Vector3<f64>,

    /// Maximum ray length (m)
    pub max_range: f64,

    /// Half-angle of the view cone (rad)
    pub half_angle: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            offset: Vector3::zeros(),
            pointing: -Vector3::z(),
            max_range: 1.0,
            half_angle: PI / 8.0,
        }
    }
}

impl SensorConfig {
    pub fn with_offset(mut self, offset: Vector3<f64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_pointing(mut self, pointing: Vector3<f64>) -> Self {
        self.pointing = pointing;
        self
    }

    pub fn with_max_range(mut self, max_range: f64) -> Self {
        self.max_range = max_range;
        self
    }

    pub fn with_half_angle(mut self, half_angle: f64) -> Self {
        self.half_angle = half_angle;
        self
    }
}

/// Casts a ray along the view axis to the ground and reports the flowers
/// inside the cone's footprint there.
pub struct FlowerSensor {
    name: String,
    host: PhysicalEntity,
    map: Arc<dyn WorldMap>,
    config: SensorConfig,
}

impl FlowerSensor {
    pub fn new(name: impl Into<String>, host: PhysicalEntity, map: Arc<dyn WorldMap>, config: SensorConfig) -> Self {
        let mut config = config;
        if let Some(unit) = config.pointing.try_normalize(1e-12) {
            config.pointing = unit;
        }
        Self {
            name: name.into(),
            host,
            map,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn host(&self) -> &PhysicalEntity {
        &self.host
    }

    fn ray_from(&self, state: &BodyState) -> (Vector3<f64>, Vector3<f64>) {
        let offset = state.to_world(&self.config.offset);
        let reach = state.to_world(&(self.config.pointing * self.config.max_range));
        let from = state.position + offset;
        (from, from + reach)
    }

    /// The sensing ray in world coordinates.
    pub fn ray(&self) -> Result<(Vector3<f64>, Vector3<f64>), SimError> {
        Ok(self.ray_from(&self.host.state()?))
    }

    /// Flowers currently in view. Empty when the sensor is blocked by a
    /// contact or the ground is out of range.
    pub fn detect_flowers(&self) -> Result<Vec<WorldObject>, SimError> {
        let state = self.host.state()?;

        let blocked = state
            .contacts
            .iter()
            .any(|c| (self.config.offset - c.body_point).norm() <= CONTACT_EPSILON);
        if blocked {
            tracing::trace!(sensor = %self.name, "sensor covered by contact");
            return Ok(Vec::new());
        }

        let (from, to) = self.ray_from(&state);
        let ground = self.map.ground_object();
        let Some(hit) = self
            .host
            .world()
            .ray_test(&from, &to)
            .into_iter()
            .find(|hit| hit.object == ground)
        else {
            return Ok(Vec::new());
        };

        let range = hit.fraction * self.config.max_range;
        if range > self.config.max_range {
            return Ok(Vec::new());
        }

        let direction = (to - from).try_normalize(1e-12).unwrap_or_else(Vector3::zeros);
        let ground_point = from + direction * range;
        let width = self.config.half_angle.tan() * range;

        Ok(self
            .map
            .objects_within(&ground_point, width)
            .into_iter()
            .filter(|object| object.kind == FLOWER_KIND)
            .collect())
    }

    pub fn is_flower_detected(&self) -> Result<bool, SimError> {
        Ok(!self.detect_flowers()?.is_empty())
    }
}

impl fmt::Debug for FlowerSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowerSensor")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::testing::StaticWorld;
    use approx::assert_relative_eq;
    use std::sync::Mutex;
    use swarm_env::{Contact, ObjectId, RayHit};

    const GROUND: ObjectId = ObjectId(0);

    /// Flat map; remembers the last footprint query.
    struct Meadow {
        objects: Vec<WorldObject>,
        last_query: Mutex<Option<(Vector3<f64>, f64)>>,
    }

    impl WorldMap for Meadow {
        fn ground_object(&self) -> ObjectId {
            GROUND
        }

        fn objects_within(&self, center: &Vector3<f64>, radius: f64) -> Vec<WorldObject> {
            *self.last_query.lock().unwrap() = Some((*center, radius));
            self.objects
                .iter()
                .filter(|o| (o.position.xy() - center.xy()).norm() <= radius)
                .cloned()
                .collect()
        }
    }

    fn object(id: u64, kind: &str, x: f64, y: f64) -> WorldObject {
        WorldObject {
            object: ObjectId(id),
            kind: kind.to_string(),
            position: Vector3::new(x, y, 0.0),
            radius: 0.02,
        }
    }

    fn setup(height: f64, hits: Vec<RayHit>) -> (Arc<StaticWorld>, Arc<Meadow>, FlowerSensor) {
        let world = StaticWorld::with_body(BodyState::at_rest(ObjectId(5), Vector3::new(0.0, 0.0, height), 0.05));
        world.set_hits(hits);
        let meadow = Arc::new(Meadow {
            objects: vec![
                object(10, FLOWER_KIND, 0.1, 0.0),
                object(11, FLOWER_KIND, 1.0, 1.0),
                object(12, "rock", 0.0, 0.05),
            ],
            last_query: Mutex::new(None),
        });
        let host = PhysicalEntity::new(ObjectId(5), world.clone());
        let sensor = FlowerSensor::new("belly", host, meadow.clone(), SensorConfig::default());
        (world, meadow, sensor)
    }

    #[test]
    fn test_footprint_filters_flowers() {
        // Half a metre up, ground hit half way down a 1 m ray
        let (_, meadow, sensor) = setup(0.5, vec![RayHit { object: GROUND, fraction: 0.5 }]);

        let found = sensor.detect_flowers().unwrap();
        let ids: Vec<ObjectId> = found.iter().map(|o| o.object).collect();
        assert_eq!(ids, vec![ObjectId(10)]);
        assert!(sensor.is_flower_detected().unwrap());

        let (center, width) = meadow.last_query.lock().unwrap().unwrap();
        assert_relative_eq!(center, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(width, (PI / 8.0).tan() * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_contact_near_sensor_blinds_it() {
        let (world, meadow, sensor) = setup(0.5, vec![RayHit { object: GROUND, fraction: 0.5 }]);
        {
            let mut bodies = world.bodies.lock().unwrap();
            bodies[0].contacts.push(Contact {
                body_point: Vector3::new(0.0, 0.005, 0.0),
                world_point: Vector3::new(0.0, 0.005, 0.5),
                other: ObjectId(77),
            });
        }

        assert!(sensor.detect_flowers().unwrap().is_empty());
        // Never got as far as querying the map
        assert!(meadow.last_query.lock().unwrap().is_none());
    }

    #[test]
    fn test_distant_contact_does_not_blind() {
        let (world, _, sensor) = setup(0.5, vec![RayHit { object: GROUND, fraction: 0.5 }]);
        world.bodies.lock().unwrap()[0].contacts.push(Contact {
            body_point: Vector3::new(0.04, 0.0, 0.0),
            world_point: Vector3::new(0.04, 0.0, 0.5),
            other: ObjectId(77),
        });
        assert!(sensor.is_flower_detected().unwrap());
    }

    #[test]
    fn test_ground_beyond_range() {
        let (_, _, sensor) = setup(5.0, vec![RayHit { object: GROUND, fraction: 1.5 }]);
        assert!(sensor.detect_flowers().unwrap().is_empty());

        let (_, _, sensor) = setup(5.0, Vec::new());
        assert!(!sensor.is_flower_detected().unwrap());
    }

    #[test]
    fn test_only_ground_hits_count() {
        // A bee in the way is skipped; the ground behind it is used
        let hits = vec![
            RayHit { object: ObjectId(8), fraction: 0.1 },
            RayHit { object: GROUND, fraction: 0.5 },
        ];
        let (_, meadow, sensor) = setup(0.5, hits);
        sensor.detect_flowers().unwrap();

        let (_, width) = meadow.last_query.lock().unwrap().unwrap();
        assert_relative_eq!(width, (PI / 8.0).tan() * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_ray_uses_offset_and_range() {
        let world = StaticWorld::with_body(BodyState::at_rest(ObjectId(1), Vector3::new(1.0, 1.0, 2.0), 0.05));
        let meadow = Arc::new(Meadow {
            objects: Vec::new(),
            last_query: Mutex::new(None),
        });
        let config = SensorConfig::default()
            .with_offset(Vector3::new(0.0, 0.0, -0.05))
            .with_max_range(3.0);
        let sensor = FlowerSensor::new("belly", PhysicalEntity::new(ObjectId(1), world), meadow, config);

        let (from, to) = sensor.ray().unwrap();
        assert_relative_eq!(from, Vector3::new(1.0, 1.0, 1.95), epsilon = 1e-12);
        assert_relative_eq!(to, Vector3::new(1.0, 1.0, -1.05), epsilon = 1e-12);
    }
}
