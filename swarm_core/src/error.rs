//! Error types for the simulation kernel.

use crate::timer::TimerId;
use swarm_env::{EnvError, ModelId, ObjectId, SimTime};
use thiserror::Error;

/// Errors raised by the scheduler, timers, and model capabilities.
///
/// None of these stop the simulation by themselves: the scheduler logs
/// handler failures and moves on to the next event.
#[derive(Debug, Error)]
pub enum SimError {
    /// Event or timer requested a time before the current simulated time
    #[error("Cannot schedule at {requested}: simulated time is already {now}")]
    InvalidSchedule { requested: SimTime, now: SimTime },

    /// No model registered under this id
    #[error("Unknown model: {0}")]
    UnknownModel(ModelId),

    /// Timer does not exist or belongs to another model
    #[error("Unknown timer: {0:?}")]
    UnknownTimer(TimerId),

    /// A component was configured with an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A collaborator needed for this operation was never attached
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Physics world does not know the host body
    #[error("Unknown physical object: {0}")]
    UnknownObject(ObjectId),

    /// Handler or timer callback was routed to a model of another type
    #[error("Model {model} is not a {expected}")]
    TypeMismatch { model: ModelId, expected: &'static str },

    /// Collaborator (physics world, network bridge) failed
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    /// Clock stayed paused longer than the configured limit
    #[error("Clock stayed paused for more than {0}ms")]
    PauseTimeout(u64),
}
