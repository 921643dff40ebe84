//! Fan-out event bus with replay history for reconnecting subscribers.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Number of recent events replayed to a new subscriber.
const HISTORY_LEN: usize = 256;

/// Live channel capacity; slower subscribers skip what they missed.
const CHANNEL_CAPACITY: usize = 1024;

/// Event names published by the relay components.
pub mod names {
    pub const QUEUE_UPDATE: &str = "queue_update";
    pub const AGENT_STATE: &str = "agent_state";
    pub const DELEGATION_UPDATE: &str = "delegation_update";
    pub const CONNECTION_STATE: &str = "connection_state";
}

/// One published `(event, payload)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event: String,
    pub payload: Value,
}

impl BusEvent {
    /// Convert into an SSE event named after the bus event.
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn to_sse_event(&self) -> axum::response::sse::Event {
        axum::response::sse::Event::default()
            .event(&self.event)
            .data(self.payload.to_string())
    }
}

/// Publish/subscribe hub shared by every component.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// only lands in the history.
pub struct EventBus {
    history: RwLock<VecDeque<BusEvent>>,
    sender: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(32)),
            sender,
        }
    }

    /// Publish an event to live subscribers and history.
    pub fn publish(&self, event: &str, payload: Value) {
        let msg = BusEvent {
            event: event.to_string(),
            payload,
        };
        tracing::trace!(event, "Publishing bus event");
        let _ = self.sender.send(msg.clone());

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(msg);
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Snapshot of the replay history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<BusEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    ///
    /// Events missed because the subscriber lagged are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, BusEvent> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(msg) => Some(msg),
                Err(e) => {
                    tracing::debug!("Event subscriber lagged: {e}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }

    /// SSE stream (requires `sse` feature).
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn sse_stream(
        &self,
    ) -> futures::stream::BoxStream<
        'static,
        Result<axum::response::sse::Event, std::convert::Infallible>,
    > {
        self.history_plus_stream()
            .map(|msg| Ok(msg.to_sse_event()))
            .boxed()
    }
}
