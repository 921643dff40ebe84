//! Wire frames of the host inspection protocol.
//!
//! Requests are `{id, method, params}`. The host answers with `{id, result}`
//! or `{id, error}`, and pushes notifications as `{method, params}` with no id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CdpError;

pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
pub const CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
pub const CONTEXT_DESTROYED: &str = "Runtime.executionContextDestroyed";
pub const CONTEXTS_CLEARED: &str = "Runtime.executionContextsCleared";

/// Outbound request frame.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

/// Error payload carried by a failed response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl From<RemoteError> for CdpError {
    fn from(err: RemoteError) -> Self {
        Self::Protocol {
            code: err.code,
            message: err.message,
        }
    }
}

/// Unsolicited host notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Context description carried by a creation notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextDescription {
    pub id: i64,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub name: String,
}

/// Execution-context lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    Created(ContextDescription),
    Destroyed(i64),
    Cleared,
}

impl Notification {
    /// Interpret the notification as a context lifecycle change, if it is one.
    #[must_use]
    pub fn context_event(&self) -> Option<ContextEvent> {
        match self.method.as_str() {
            CONTEXT_CREATED => serde_json::from_value(self.params.get("context")?.clone())
                .ok()
                .map(ContextEvent::Created),
            CONTEXT_DESTROYED => self
                .params
                .get("executionContextId")
                .and_then(Value::as_i64)
                .map(ContextEvent::Destroyed),
            CONTEXTS_CLEARED => Some(ContextEvent::Cleared),
            _ => None,
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Response {
        id: u64,
        outcome: Result<Value, RemoteError>,
    },
    Notification(Notification),
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RemoteError>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// Decode one inbound text frame.
///
/// # Errors
/// Returns error if the frame is not JSON or has neither an id nor a method.
pub fn parse_frame(text: &str) -> Result<Inbound, CdpError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    match (raw.id, raw.method) {
        (Some(id), _) => {
            let outcome = match raw.error {
                Some(err) => Err(err),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            Ok(Inbound::Response { id, outcome })
        }
        (None, Some(method)) => Ok(Inbound::Notification(Notification {
            method,
            params: raw.params,
        })),
        (None, None) => Err(CdpError::Malformed("frame has neither id nor method".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let params = json!({ "expression": "1 + 1" });
        let frame = serde_json::to_value(Request {
            id: 7,
            method: RUNTIME_EVALUATE,
            params: &params,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({ "id": 7, "method": "Runtime.evaluate", "params": { "expression": "1 + 1" } })
        );
    }

    #[test]
    fn test_error_response_is_rejection() {
        let frame =
            parse_frame(r#"{"id":3,"error":{"code":-32000,"message":"Cannot find context"}}"#)
                .unwrap();
        match frame {
            Inbound::Response { id, outcome } => {
                assert_eq!(id, 3);
                let err = outcome.unwrap_err();
                assert_eq!(err.code, -32000);
                assert_eq!(err.message, "Cannot find context");
            }
            Inbound::Notification(_) => panic!("expected a response"),
        }
    }

    #[test]
    fn test_context_notifications() {
        let created = parse_frame(
            r#"{"method":"Runtime.executionContextCreated",
                "params":{"context":{"id":4,"origin":"vscode-file://vscode-app","name":"","uniqueId":"x"}}}"#,
        )
        .unwrap();
        let Inbound::Notification(created) = created else {
            panic!("expected a notification");
        };
        assert_eq!(
            created.context_event(),
            Some(ContextEvent::Created(ContextDescription {
                id: 4,
                origin: "vscode-file://vscode-app".into(),
                name: String::new(),
            }))
        );

        let destroyed = Notification {
            method: CONTEXT_DESTROYED.into(),
            params: json!({ "executionContextId": 4 }),
        };
        assert_eq!(destroyed.context_event(), Some(ContextEvent::Destroyed(4)));

        let cleared = Notification {
            method: CONTEXTS_CLEARED.into(),
            params: Value::Null,
        };
        assert_eq!(cleared.context_event(), Some(ContextEvent::Cleared));

        let other = Notification {
            method: "Page.loadEventFired".into(),
            params: Value::Null,
        };
        assert_eq!(other.context_event(), None);
    }

    #[test]
    fn test_frame_without_id_or_method_is_malformed() {
        assert!(matches!(
            parse_frame(r#"{"params":{}}"#),
            Err(CdpError::Malformed(_))
        ));
        assert!(matches!(parse_frame("not json"), Err(CdpError::Json(_))));
    }
}
