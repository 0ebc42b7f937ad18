//! NS interface: hands packets to an external network simulator and turns
//! its answers back into events.
//!
//! # Packet Flow
//!
//! ```text
//! enqueue ──► FIFO ──► send timer fires at max(tx_time, now)
//!                          │
//!                          ▼  clock held
//!                  NetworkBridge::exchange(packet, node positions)
//!                          │
//!                          ▼  clock released
//!        NsEvent on each destination at its delivery time ──► listeners
//! ```

use crate::error::SimError;
use crate::listeners::{Channel, Listeners};
use crate::model::Model;
use crate::scheduler::ModelContext;
use crate::timer::Timer;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use swarm_env::{
    Aggregator, BridgeRequest, ModelId, NetworkBridge, NodePlacement, NsDelivery, NsPacket, PhysicsWorld, SimDuration, SimTime,
};

/// Default bound on the outgoing packet queue.
pub const DEFAULT_NS_QUEUE_SIZE: usize = 100;

/// A packet the network simulator delivered to this model.
#[derive(Debug, Clone, PartialEq)]
pub struct NsEvent {
    pub delivery: NsDelivery,
}

/// Network-simulator capability held by a model.
pub struct NsInterface {
    bridge: Option<Arc<dyn NetworkBridge>>,

    /// Source of node positions for the topology snapshot
    world: Option<Arc<dyn PhysicsWorld>>,

    aggregator: Arc<dyn Aggregator>,
    queue: VecDeque<NsPacket>,
    capacity: usize,
    send_timer: Option<Timer>,
    listeners: Listeners,
    sent: u64,
    received: u64,
}

impl NsInterface {
    pub fn new(aggregator: Arc<dyn Aggregator>) -> Self {
        Self {
            bridge: None,
            world: None,
            aggregator,
            queue: VecDeque::new(),
            capacity: DEFAULT_NS_QUEUE_SIZE,
            send_timer: None,
            listeners: Listeners::default(),
            sent: 0,
            received: 0,
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn NetworkBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_world(mut self, world: Arc<dyn PhysicsWorld>) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn attach_bridge(&mut self, bridge: Arc<dyn NetworkBridge>) {
        self.bridge = Some(bridge);
    }

    /// Creates the send timer on the owning model. Packets queued before
    /// this call still go out at their own transmit times.
    pub fn initialize<M: Model>(&mut self, ctx: &mut ModelContext<'_>, project: fn(&mut M) -> &mut NsInterface) -> Result<(), SimError> {
        let timer = ctx.create_timer(
            move |model: &mut M, ctx: &mut ModelContext<'_>, timer: Timer, time: SimTime| {
                project(model).on_send(ctx, timer, time)
            },
            SimDuration::ZERO,
            SimDuration::ZERO,
        )?;
        self.send_timer = Some(timer);
        Ok(())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn packets_sent(&self) -> u64 {
        self.sent
    }

    pub fn packets_received(&self) -> u64 {
        self.received
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn add_listener(&mut self, model: ModelId) -> bool {
        self.listeners.add(model)
    }

    pub fn remove_listener(&mut self, model: ModelId) -> bool {
        self.listeners.remove(model)
    }

    /// Queues `packet` for the network simulator.
    ///
    /// Returns `false` without queuing when the queue is full.
    pub fn enqueue(&mut self, ctx: &mut ModelContext<'_>, packet: NsPacket) -> bool {
        if self.queue.len() >= self.capacity {
            tracing::debug!(model = %ctx.model_id(), queued = self.queue.len(), "ns queue full");
            return false;
        }

        let at = packet.tx_time.max(ctx.now());
        self.queue.push_back(packet);

        if let Some(timer) = self.send_timer {
            if timer.next_firing_time(ctx).is_none() {
                if let Err(e) = timer.reset(ctx, at, SimDuration::ZERO, SimDuration::ZERO) {
                    tracing::warn!("failed to arm ns send timer: {}", e);
                }
            }
        }
        true
    }

    fn on_send(&mut self, ctx: &mut ModelContext<'_>, timer: Timer, time: SimTime) -> Result<(), SimError> {
        match self.queue.front().map(|head| head.tx_time) {
            None => return timer.cancel(ctx),
            // Head is not due yet
            Some(tx_time) if tx_time > time => {
                return timer.reset(ctx, tx_time, SimDuration::ZERO, SimDuration::ZERO);
            }
            Some(_) => {}
        }
        let Some(mut packet) = self.queue.pop_front() else {
            return Ok(());
        };
        // A packet queued with a past transmit time leaves now
        packet.tx_time = time;
        let result = self.exchange(ctx, packet);

        match self.queue.front() {
            Some(next) => {
                let at = next.tx_time.max(time);
                timer.reset(ctx, at, SimDuration::ZERO, SimDuration::ZERO)?;
            }
            None => timer.cancel(ctx)?,
        }
        result.map(|_| ())
    }

    /// Positions of every embodied model, as the network simulator sees them.
    fn snapshot(&self, ctx: &ModelContext<'_>) -> Vec<NodePlacement> {
        let Some(world) = &self.world else {
            return Vec::new();
        };
        ctx.registry()
            .embodied()
            .filter_map(|(model, object)| {
                world
                    .body_state(object)
                    .map(|state| NodePlacement {
                        model,
                        position: state.position,
                    })
            })
            .collect()
    }

    /// Runs one packet through the bridge with the clock held, then schedules
    /// the deliveries. Returns how many were scheduled.
    ///
    /// # Errors
    /// * `MissingCollaborator` - no bridge attached
    /// * `Env` - the bridge failed or timed out
    /// * the first scheduling error, if any delivery could not be scheduled;
    ///   the remaining deliveries are still scheduled
    fn exchange(&mut self, ctx: &mut ModelContext<'_>, packet: NsPacket) -> Result<usize, SimError> {
        let bridge = self
            .bridge
            .clone()
            .ok_or(SimError::MissingCollaborator("network bridge"))?;
        let request = BridgeRequest {
            nodes: self.snapshot(ctx),
            packet,
        };
        let source = request.packet.source;

        let deliveries = {
            let _paused = ctx.clock().hold();
            bridge.exchange(request)
        }?;

        self.sent += 1;
        self.aggregator.add_value("ns", "packets-sent", 1.0);

        let mut scheduled = 0;
        let mut failure = None;
        for delivery in deliveries {
            let (destination, at) = (delivery.destination, delivery.delivery_time);
            match ctx.schedule_event(destination, at, NsEvent { delivery }) {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    tracing::warn!(%source, %destination, "dropping ns delivery: {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        tracing::debug!(%source, scheduled, "ns exchange complete");
        match failure {
            Some(e) => Err(e),
            None => Ok(scheduled),
        }
    }

    /// Handles an `NsEvent` routed to the owning model.
    pub fn handle_delivery(&mut self, ctx: &mut ModelContext<'_>, event: &NsEvent) -> Result<(), SimError> {
        self.received += 1;
        self.aggregator.add_value("ns", "packets-received", 1.0);
        let now = ctx.now();
        self.listeners
            .notify(ctx, now, &event.delivery.payload, 0.0, Channel::Ns);
        Ok(())
    }
}

impl fmt::Debug for NsInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsInterface")
            .field("queued", &self.queue.len())
            .field("capacity", &self.capacity)
            .field("sent", &self.sent)
            .field("received", &self.received)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
