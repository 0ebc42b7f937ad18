//! Errors raised while assembling or running a simulated world.

use swarm_core::SimError;
use swarm_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The kernel rejected an operation
    #[error("Simulation error: {0}")]
    Sim(#[from] SimError),

    /// A collaborator (bridge runtime, physics) failed
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
