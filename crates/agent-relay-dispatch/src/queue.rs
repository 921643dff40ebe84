//! Busy-aware action queue.
//!
//! Pending text commands wait in FIFO order and are handed to the prober one
//! per tick, only while the agent reports idle.

use std::{sync::Arc, time::Duration};

use agent_relay_cdp::{ActionRunner, Capability, ProbeOutcome};
use agent_relay_core::{ActionQueueItem, EventBus, StateHandle, event_bus::names};
use serde::Serialize;
use serde_json::json;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::AgentMonitor;

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Nothing queued.
    Empty,
    /// The agent is busy; the head was not submitted.
    AgentBusy,
    /// The head was delivered and removed.
    Delivered { id: String },
    /// The agent turned out busy; the head stays queued.
    Deferred { id: String },
    /// Delivery failed for another reason; the head was dropped.
    Dropped { id: String },
}

/// FIFO of pending text commands delivered through the `send_message` capability.
pub struct ActionQueue {
    state: Arc<StateHandle>,
    bus: Arc<EventBus>,
    agent: Arc<AgentMonitor>,
    runner: Arc<dyn ActionRunner>,
    send_message: Arc<dyn Capability>,
}

impl ActionQueue {
    /// Create a new queue processor.
    #[must_use]
    pub fn new(
        state: Arc<StateHandle>,
        bus: Arc<EventBus>,
        agent: Arc<AgentMonitor>,
        runner: Arc<dyn ActionRunner>,
        send_message: Arc<dyn Capability>,
    ) -> Self {
        Self {
            state,
            bus,
            agent,
            runner,
            send_message,
        }
    }

    /// Append an item to the tail and return its position (the new length).
    pub async fn enqueue(&self, text: impl Into<String>, origin: impl Into<String>) -> usize {
        let item = ActionQueueItem::new(text, origin);
        let id = item.id.clone();
        let count = self
            .state
            .mutate(|doc| {
                doc.queue.push(item);
                doc.queue.len()
            })
            .await;
        self.state.persist_or_log().await;
        self.publish_count(count);
        tracing::info!(id, position = count, "Action queued");
        count
    }

    /// Number of queued items.
    pub async fn pending(&self) -> usize {
        self.state.read(|doc| doc.queue.len()).await
    }

    /// Copy of the queued items, head first.
    pub async fn items(&self) -> Vec<ActionQueueItem> {
        self.state.read(|doc| doc.queue.clone()).await
    }

    /// Submit `text` immediately, bypassing the queue and the busy gate.
    ///
    /// Nothing serializes this against [`ActionQueue::tick`]; both may reach
    /// the prober at the same time.
    pub async fn deliver_now(&self, text: &str) -> ProbeOutcome {
        let outcome = self
            .runner
            .run(self.send_message.as_ref(), &json!({ "text": text }))
            .await;
        if outcome.is_busy() {
            self.agent.mark_busy().await;
        }
        outcome
    }

    /// Run one delivery attempt for the head item.
    pub async fn tick(&self) -> TickOutcome {
        let (busy, head) = self
            .state
            .read(|doc| (doc.agent.busy, doc.queue.first().cloned()))
            .await;
        let Some(item) = head else {
            return TickOutcome::Empty;
        };
        if busy {
            tracing::trace!(id = %item.id, "Agent busy, holding queue");
            return TickOutcome::AgentBusy;
        }

        let outcome = self
            .runner
            .run(self.send_message.as_ref(), &json!({ "text": item.text }))
            .await;

        match outcome {
            ProbeOutcome::Delivered { context_id, .. } => {
                let count = self.remove(&item.id).await;
                tracing::info!(
                    id = %item.id,
                    context_id,
                    remaining = count,
                    "Queued action delivered"
                );
                TickOutcome::Delivered { id: item.id }
            }
            ProbeOutcome::Busy { .. } => {
                self.agent.mark_busy().await;
                tracing::debug!(id = %item.id, "Agent busy, action stays queued");
                TickOutcome::Deferred { id: item.id }
            }
            ProbeOutcome::CapabilityNotFound { sweeps } => {
                let count = self.remove(&item.id).await;
                tracing::warn!(
                    id = %item.id,
                    sweeps,
                    remaining = count,
                    "Dropping undeliverable action"
                );
                TickOutcome::Dropped { id: item.id }
            }
        }
    }

    /// Run [`ActionQueue::tick`] every `period` until the task is aborted.
    ///
    /// Ticks never overlap: a slow delivery delays the next tick.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    // The head is removed by id: other handlers may have changed the queue
    // while the delivery was in flight.
    async fn remove(&self, id: &str) -> usize {
        let count = self
            .state
            .mutate(|doc| {
                doc.queue.retain(|item| item.id != id);
                doc.queue.len()
            })
            .await;
        self.state.persist_or_log().await;
        self.publish_count(count);
        count
    }

    fn publish_count(&self, count: usize) {
        self.bus
            .publish(names::QUEUE_UPDATE, json!({ "count": count }));
    }
}
