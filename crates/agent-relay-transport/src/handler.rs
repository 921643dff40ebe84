//! Maps client messages onto the relay's operations.

use std::sync::Arc;

use agent_relay_core::EventBus;
use agent_relay_dispatch::{AcceptOutcome, ActionQueue, AgentMonitor, DelegationSupervisor};

use crate::protocol::{ClientMessage, ServerMessage};

/// Components a client connection talks to.
#[derive(Clone)]
pub struct RelayState {
    pub bus: Arc<EventBus>,
    pub queue: Arc<ActionQueue>,
    pub agent: Arc<AgentMonitor>,
    pub delegations: Arc<DelegationSupervisor>,
}

/// Run one client request and build its reply.
pub async fn handle_message(state: &RelayState, msg: ClientMessage) -> ServerMessage {
    match msg {
        ClientMessage::Ping => ServerMessage::Pong,
        ClientMessage::Enqueue { text, origin } => ServerMessage::Queued {
            position: state.queue.enqueue(text, origin).await,
        },
        ClientMessage::Send { text } => ServerMessage::Delivered {
            result: state.queue.deliver_now(&text).await.into_value(),
        },
        ClientMessage::Heartbeat { busy, task } => ServerMessage::Agent {
            agent: state.agent.heartbeat(busy, task).await,
        },
        ClientMessage::Delegate(request) => match state.delegations.create(request).await {
            Ok(record) => ServerMessage::Delegation { record },
            Err(e) => error(&e),
        },
        ClientMessage::ListDelegations(filter) => {
            ServerMessage::Delegations(state.delegations.list(&filter).await)
        }
        ClientMessage::CompleteDelegation { id, result, error: failure } => {
            match state.delegations.complete(&id, result, failure).await {
                Ok(record) => ServerMessage::Delegation { record },
                Err(e) => error(&e),
            }
        }
        ClientMessage::AcceptDelegation { id } => match state.delegations.accept(&id).await {
            Ok(AcceptOutcome::Accepted(record)) => ServerMessage::Delegation { record },
            Ok(AcceptOutcome::Rejected { reason, .. }) => ServerMessage::Rejected {
                reason: reason.to_string(),
            },
            Err(e) => error(&e),
        },
    }
}

fn error(err: &impl std::fmt::Display) -> ServerMessage {
    tracing::warn!("Client request failed: {err}");
    ServerMessage::Error {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use agent_relay_cdp::{ActionRunner, Capability, ProbeOutcome, ScriptCapability};
    use agent_relay_core::{
        DelegationStatus, StateDocument, StateHandle, config::DelegationConfig,
        storage::MemoryStore,
    };
    use agent_relay_dispatch::DelegationFilter;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;

    struct AlwaysDelivers;

    #[async_trait]
    impl ActionRunner for AlwaysDelivers {
        async fn run(&self, _capability: &dyn Capability, _arg: &Value) -> ProbeOutcome {
            ProbeOutcome::Delivered {
                context_id: 1,
                report: json!({ "ok": true, "sent": true }),
            }
        }
    }

    fn relay() -> RelayState {
        let state = Arc::new(StateHandle::new(
            StateDocument::default(),
            Arc::new(MemoryStore::new()),
        ));
        let bus = Arc::new(EventBus::new());
        let runner: Arc<dyn ActionRunner> = Arc::new(AlwaysDelivers);
        let agent = Arc::new(AgentMonitor::new(state.clone(), bus.clone()));
        let script = |name: &str| -> Arc<dyn Capability> {
            Arc::new(ScriptCapability::new(name, "PROBE", "ACTION"))
        };
        let queue = Arc::new(ActionQueue::new(
            state.clone(),
            bus.clone(),
            agent.clone(),
            runner.clone(),
            script("send_message"),
        ));
        let delegations = Arc::new(DelegationSupervisor::new(
            state,
            bus.clone(),
            runner,
            script("focus_target"),
            script("switch_model"),
            queue.clone(),
            DelegationConfig::default(),
        ));
        RelayState {
            bus,
            queue,
            agent,
            delegations,
        }
    }

    #[tokio::test]
    async fn test_enqueue_send_and_heartbeat() {
        let relay = relay();
        assert_eq!(handle_message(&relay, ClientMessage::Ping).await, ServerMessage::Pong);

        let queued = handle_message(
            &relay,
            ClientMessage::Enqueue {
                text: "check inbox".into(),
                origin: "mobile".into(),
            },
        )
        .await;
        assert_eq!(queued, ServerMessage::Queued { position: 1 });

        let sent = handle_message(&relay, ClientMessage::Send { text: "hi".into() }).await;
        assert_eq!(
            sent,
            ServerMessage::Delivered {
                result: json!({ "ok": true, "sent": true })
            }
        );

        let ServerMessage::Agent { agent } = handle_message(
            &relay,
            ClientMessage::Heartbeat {
                busy: true,
                task: None,
            },
        )
        .await
        else {
            panic!("expected agent state");
        };
        assert!(agent.busy);
        assert!(relay.agent.is_busy().await);
    }

    #[tokio::test]
    async fn test_delegation_lifecycle_over_messages() {
        let relay = relay();
        let request = serde_json::from_value(json!({
            "type": "delegate",
            "targetTab": "tab-1",
            "task": "triage issues",
        }))
        .unwrap();
        let ServerMessage::Delegation { record } = handle_message(&relay, request).await else {
            panic!("expected delegation");
        };
        assert_eq!(record.status, DelegationStatus::InProgress);

        let done = handle_message(
            &relay,
            ClientMessage::CompleteDelegation {
                id: record.id.clone(),
                result: Some("3 issues triaged".into()),
                error: None,
            },
        )
        .await;
        let ServerMessage::Delegation { record: done } = done else {
            panic!("expected delegation");
        };
        assert_eq!(done.status, DelegationStatus::Completed);

        let again = handle_message(
            &relay,
            ClientMessage::AcceptDelegation {
                id: record.id.clone(),
            },
        )
        .await;
        assert_eq!(
            again,
            ServerMessage::Rejected {
                reason: "already_completed".into()
            }
        );

        let ServerMessage::Delegations(listing) =
            handle_message(&relay, ClientMessage::ListDelegations(DelegationFilter::default()))
                .await
        else {
            panic!("expected listing");
        };
        assert_eq!(listing.summary.completed, 1);
    }

    #[tokio::test]
    async fn test_unknown_delegation_is_an_error() {
        let relay = relay();
        let reply = handle_message(
            &relay,
            ClientMessage::AcceptDelegation {
                id: "del_missing".into(),
            },
        )
        .await;
        let ServerMessage::Error { message } = reply else {
            panic!("expected error");
        };
        assert!(message.contains("del_missing"));
    }
}
