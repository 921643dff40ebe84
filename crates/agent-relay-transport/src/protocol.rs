//! Wire protocol for client-server communication.

use agent_relay_core::{AgentState, BusEvent, Delegation};
use agent_relay_dispatch::{CreateDelegation, DelegationFilter, DelegationListing};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_origin() -> String {
    "client".to_string()
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Queue a text command for delivery once the agent is idle.
    Enqueue {
        text: String,
        #[serde(default = "default_origin")]
        origin: String,
    },
    /// Deliver a text command right away, bypassing the queue.
    Send { text: String },
    /// Agent busy/idle report.
    Heartbeat {
        busy: bool,
        #[serde(default)]
        task: Option<String>,
    },
    /// Hand a task to a target tab.
    Delegate(CreateDelegation),
    ListDelegations(DelegationFilter),
    CompleteDelegation {
        id: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    AcceptDelegation { id: String },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A bus event, replayed or live.
    Event { event: String, payload: Value },
    /// Position of a newly queued command.
    Queued { position: usize },
    /// Structured result of a direct delivery.
    Delivered { result: Value },
    /// Agent state after a heartbeat.
    Agent { agent: AgentState },
    Delegation { record: Delegation },
    Delegations(DelegationListing),
    /// The request was valid but refused.
    Rejected { reason: String },
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl From<BusEvent> for ServerMessage {
    fn from(event: BusEvent) -> Self {
        Self::Event {
            event: event.event,
            payload: event.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_relay_core::DelegationStatus;
    use agent_relay_dispatch::ModelSelector;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_enqueue_defaults_origin() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"enqueue","text":"check inbox"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Enqueue {
                text: "check inbox".into(),
                origin: "client".into()
            }
        );
    }

    #[test]
    fn test_delegate_fields_are_inlined() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"delegate","targetTab":"tab-2","task":"write tests","model":2,"timeoutMs":60000}"#,
        )
        .unwrap();
        let ClientMessage::Delegate(request) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(request.target_tab, "tab-2");
        assert_eq!(request.model, Some(ModelSelector::Index(2)));
        assert_eq!(request.timeout_ms, Some(60_000));
        assert_eq!(request.priority, None);
    }

    #[test]
    fn test_list_filter_is_optional() {
        let all: ClientMessage = serde_json::from_str(r#"{"type":"list_delegations"}"#).unwrap();
        assert_eq!(all, ClientMessage::ListDelegations(DelegationFilter::default()));

        let narrowed: ClientMessage =
            serde_json::from_str(r#"{"type":"list_delegations","status":"timeout"}"#).unwrap();
        let ClientMessage::ListDelegations(filter) = narrowed else {
            panic!("Wrong message type");
        };
        assert_eq!(filter.status, Some(DelegationStatus::Timeout));
    }

    #[test]
    fn test_bus_event_becomes_event_message() {
        let msg = ServerMessage::from(BusEvent {
            event: "queue_update".into(),
            payload: json!({ "count": 0 }),
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "event", "event": "queue_update", "payload": { "count": 0 } })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Pong).unwrap(),
            json!({ "type": "pong" })
        );
    }
}
