//! Swarm Core - discrete-event kernel for embodied radio agents
//!
//! Everything in a run is a [`Model`] reacting to events in strict
//! simulated-time order:
//! - **Scheduler**: owns the models and the event queue; dispatches one event
//!   at a time by payload type
//! - **Timer**: one-shot and periodic callbacks on the owning model
//! - **ClockControl**: freezes simulated time while a handler waits on
//!   something outside the simulation
//! - **Radio / NsInterface / FlowerSensor**: capabilities a model embeds to
//!   talk and sense through the collaborators in `swarm_env`
//!
//! # Example
//!
//! ```ignore
//! let mut scheduler = Scheduler::new();
//! let bee = scheduler.add_model_with(Bee::new(...), ModelOptions::default().embodied_as(body))?;
//! scheduler.run_until(SimTime::from_millis(10_000))?;
//! scheduler.finish();
//! ```

pub mod clock;
pub mod entity;
pub mod error;
pub mod listeners;
pub mod model;
pub mod ns_bridge;
pub mod radio;
pub mod scheduler;
pub mod sensor;
pub mod timer;

pub use clock::{ClockControl, PauseGuard};
pub use entity::PhysicalEntity;
pub use error::SimError;
pub use listeners::{Channel, Listeners, MessageReceived};
pub use model::{AsAny, Handler, HandlerTable, Model, ModelInfo, ModelOptions, ModelRegistry, Platform};
pub use ns_bridge::{NsEvent, NsInterface, DEFAULT_NS_QUEUE_SIZE};
pub use radio::{antenna_normal, Radio, RadioConfig, ReceptionEvent, BYTES_PER_KILOBIT, DEFAULT_SEND_QUEUE_SIZE, IDLE_WINDOW_MS};
pub use scheduler::{Advance, Diagnostic, ModelContext, RunSummary, Scheduler, SchedulerConfig};
pub use sensor::{FlowerSensor, SensorConfig, CONTACT_EPSILON, FLOWER_KIND};
pub use timer::{Timer, TimerId};

// Shared vocabulary, re-exported so models need only this crate.
pub use swarm_env::{ModelId, ObjectId, SimDuration, SimTime, TimeUnit};
