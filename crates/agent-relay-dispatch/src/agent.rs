//! Busy/idle view of the remote agent.

use std::sync::Arc;

use agent_relay_core::{AgentState, EventBus, StateHandle, event_bus::names, now_millis};
use serde_json::json;

/// Tracks `AgentState` from heartbeats and observed busy signals.
pub struct AgentMonitor {
    state: Arc<StateHandle>,
    bus: Arc<EventBus>,
}

impl AgentMonitor {
    #[must_use]
    pub const fn new(state: Arc<StateHandle>, bus: Arc<EventBus>) -> Self {
        Self { state, bus }
    }

    /// Record a heartbeat from the agent.
    pub async fn heartbeat(&self, busy: bool, task: Option<String>) -> AgentState {
        let agent = self
            .state
            .mutate(|doc| {
                doc.agent.busy = busy;
                doc.agent.task = task;
                doc.agent.last_seen = Some(now_millis());
                doc.agent.clone()
            })
            .await;
        tracing::debug!(busy, "Agent heartbeat");
        self.commit(agent).await
    }

    /// Record that a delivery attempt found the agent busy.
    pub async fn mark_busy(&self) -> AgentState {
        let agent = self
            .state
            .mutate(|doc| {
                doc.agent.busy = true;
                doc.agent.clone()
            })
            .await;
        self.commit(agent).await
    }

    pub async fn snapshot(&self) -> AgentState {
        self.state.read(|doc| doc.agent.clone()).await
    }

    pub async fn is_busy(&self) -> bool {
        self.state.read(|doc| doc.agent.busy).await
    }

    async fn commit(&self, agent: AgentState) -> AgentState {
        self.state.persist_or_log().await;
        self.bus.publish(names::AGENT_STATE, json!(agent));
        agent
    }
}

#[cfg(test)]
mod tests {
    use agent_relay_core::{StateDocument, storage::MemoryStore};

    use super::*;

    #[tokio::test]
    async fn test_heartbeat_stamps_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(StateHandle::new(StateDocument::default(), store.clone()));
        let bus = Arc::new(EventBus::new());
        let monitor = AgentMonitor::new(state, bus.clone());

        let agent = monitor.heartbeat(true, Some("refactor".into())).await;
        assert!(agent.busy);
        assert!(agent.last_seen.is_some());
        assert!(store.snapshot().unwrap().agent.busy);

        let event = bus.history().pop().unwrap();
        assert_eq!(event.event, names::AGENT_STATE);
        assert_eq!(event.payload["busy"], true);
        assert_eq!(event.payload["task"], "refactor");

        let idle = monitor.heartbeat(false, None).await;
        assert!(!idle.busy);
        assert!(!monitor.is_busy().await);
    }

    #[tokio::test]
    async fn test_mark_busy_keeps_task() {
        let mut doc = StateDocument::default();
        doc.agent.task = Some("review".into());
        let state = Arc::new(StateHandle::new(doc, Arc::new(MemoryStore::new())));
        let monitor = AgentMonitor::new(state, Arc::new(EventBus::new()));

        let agent = monitor.mark_busy().await;
        assert!(agent.busy);
        assert_eq!(agent.task.as_deref(), Some("review"));
        assert_eq!(monitor.snapshot().await, agent);
    }
}
