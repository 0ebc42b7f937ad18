//! Subscriber sets for received messages.

use crate::scheduler::ModelContext;
use serde::Serialize;
use std::collections::BTreeSet;
use swarm_env::{ModelId, SimTime};

/// Which capability delivered a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    Radio,
    Ns,
}

/// Delivered to every listener of a radio or NS interface.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageReceived {
    pub time: SimTime,
    pub payload: Vec<u8>,

    /// Received power; always 0 for NS deliveries
    pub rx_power_dbm: f64,

    pub channel: Channel,
}

/// Models subscribed to a capability's received messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listeners {
    members: BTreeSet<ModelId>,
}

impl Listeners {
    /// Returns false if `model` was already subscribed.
    pub fn add(&mut self, model: ModelId) -> bool {
        self.members.insert(model)
    }

    /// Returns false if `model` was not subscribed.
    pub fn remove(&mut self, model: ModelId) -> bool {
        self.members.remove(&model)
    }

    pub fn contains(&self, model: ModelId) -> bool {
        self.members.contains(&model)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.members.iter().copied()
    }

    /// Schedules a `MessageReceived` at `time` for every listener and returns
    /// how many were notified. Listeners that disappeared are skipped.
    pub fn notify(&self, ctx: &mut ModelContext<'_>, time: SimTime, payload: &[u8], rx_power_dbm: f64, channel: Channel) -> usize {
        let mut notified = 0;
        for listener in &self.members {
            let event = MessageReceived {
                time,
                payload: payload.to_vec(),
                rx_power_dbm,
                channel,
            };
            match ctx.schedule_event(*listener, time, event) {
                Ok(()) => notified += 1,
                Err(e) => tracing::warn!(%listener, "dropping notification: {}", e),
            }
        }
        notified
    }
}
