//! Model that advances the kinematic world on a fixed tick.

use crate::error::HarnessError;
use crate::kinematics::KinematicWorld;
use std::sync::Arc;
use swarm_core::{HandlerTable, Model, ModelContext, SimDuration, SimError, SimTime, Timer};

/// Steps the world every `step` of simulated time.
///
/// Registered before the bees, so at any instant shared with a bee timer the
/// world moves first.
pub struct PhysicsStepper {
    world: Arc<KinematicWorld>,
    step: SimDuration,
    timer: Option<Timer>,
    steps: u64,
}

impl PhysicsStepper {
    pub fn new(world: Arc<KinematicWorld>, step: SimDuration) -> Result<Self, HarnessError> {
        if step.is_zero() {
            return Err(HarnessError::config("physics step must be positive"));
        }
        Ok(Self {
            world,
            step,
            timer: None,
            steps: 0,
        })
    }

    /// Builds a stepper running at `hz` ticks per second.
    pub fn at_rate(world: Arc<KinematicWorld>, hz: u32) -> Result<Self, HarnessError> {
        if hz == 0 {
            return Err(HarnessError::config("tick rate must be positive"));
        }
        Self::new(world, SimDuration::from_nanos(1_000_000_000 / u64::from(hz)))
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step_size(&self) -> SimDuration {
        self.step
    }

    fn tick(&mut self, _ctx: &mut ModelContext<'_>, _timer: Timer, _time: SimTime) -> Result<(), SimError> {
        self.world.step(self.step.as_secs_f64());
        self.steps += 1;
        Ok(())
    }
}

impl Model for PhysicsStepper {
    fn handlers() -> HandlerTable<Self> {
        HandlerTable::new()
    }

    fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
        let timer = ctx.create_timer::<PhysicsStepper, _>(PhysicsStepper::tick, self.step, self.step)?;
        self.timer = Some(timer);
        Ok(())
    }

    fn finish(&mut self, _ctx: &mut ModelContext<'_>) {
        tracing::debug!(steps = self.steps, time = self.world.time(), "physics stepper finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use swarm_core::Scheduler;
    use swarm_env::{Actuation, PhysicsWorld};

    #[test]
    fn test_steps_on_every_tick() {
        let world = Arc::new(KinematicWorld::new(1));
        let body = world.add_body(Vector3::new(0.0, 0.0, 1.0), 0.1, 1.0).unwrap();
        world
            .actuate(body, Actuation::Impulse { impulse: Vector3::x(), offset: None })
            .unwrap();

        let mut scheduler = Scheduler::new();
        let id = scheduler
            .add_model(PhysicsStepper::at_rate(world.clone(), 100).unwrap())
            .unwrap();
        scheduler.run_until(SimTime::from_millis(1_000)).unwrap();

        assert_eq!(scheduler.model::<PhysicsStepper>(id).unwrap().steps(), 100);
        assert_relative_eq!(world.time(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(world.body(body).unwrap().position.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_zero_step() {
        let world = Arc::new(KinematicWorld::new(1));
        assert!(PhysicsStepper::new(world.clone(), SimDuration::ZERO).is_err());
        assert!(PhysicsStepper::at_rate(world, 0).is_err());
    }
}
