//! The persisted state document and the records it holds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// A pending text command waiting for the agent to become idle.
///
/// Items are immutable once created; only the queue processor removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionQueueItem {
    pub id: String,
    pub text: String,
    pub origin: String,
    pub added_at: Millis,
}

impl ActionQueueItem {
    /// Create a new item stamped with the current time.
    #[must_use]
    pub fn new(text: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: format!("act_{}", Uuid::new_v4().simple()),
            text: text.into(),
            origin: origin.into(),
            added_at: now_millis(),
        }
    }
}

/// Delegation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    /// Recorded, not yet handed to the target.
    Pending,
    /// Handed off; the timeout window is running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error, or the hand-off itself failed.
    Failed,
    /// The deadline passed while in progress.
    Timeout,
}

/// Delegation priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A tracked unit of work assigned to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub id: String,
    pub target_tab: String,
    pub task: String,
    pub model_name: Option<String>,
    pub model_index: Option<usize>,
    #[serde(default)]
    pub priority: DelegationPriority,
    pub timeout_ms: u64,
    pub status: DelegationStatus,
    pub created_at: Millis,
    pub started_at: Option<Millis>,
    pub accepted_at: Option<Millis>,
    pub completed_at: Option<Millis>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Delegation {
    /// Create a pending delegation.
    #[must_use]
    pub fn new(
        target_tab: impl Into<String>,
        task: impl Into<String>,
        priority: DelegationPriority,
        timeout_ms: u64,
    ) -> Self {
        Self {
            id: format!("del_{}", Uuid::new_v4().simple()),
            target_tab: target_tab.into(),
            task: task.into(),
            model_name: None,
            model_index: None,
            priority,
            timeout_ms,
            status: DelegationStatus::Pending,
            created_at: now_millis(),
            started_at: None,
            accepted_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Milliseconds spent in progress past the deadline, if any.
    #[must_use]
    pub fn overdue_by(&self, now: Millis) -> Option<u64> {
        if self.status != DelegationStatus::InProgress {
            return None;
        }
        let started = self.started_at?;
        let elapsed = u64::try_from(now.saturating_sub(started)).unwrap_or(0);
        (elapsed > self.timeout_ms).then_some(elapsed)
    }
}

/// Process-wide view of the remote agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub busy: bool,
    pub last_seen: Option<Millis>,
    pub task: Option<String>,
}

/// Everything the relay persists, saved as one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateDocument {
    pub queue: Vec<ActionQueueItem>,
    pub delegations: Vec<Delegation>,
    pub agent: AgentState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overdue_only_counts_in_progress() {
        let mut delegation = Delegation::new("tab", "task", DelegationPriority::Normal, 100);
        assert_eq!(delegation.overdue_by(delegation.created_at + 500), None);

        delegation.status = DelegationStatus::InProgress;
        delegation.started_at = Some(1_000);
        assert_eq!(delegation.overdue_by(1_050), None);
        assert_eq!(delegation.overdue_by(1_100), None);
        assert_eq!(delegation.overdue_by(1_150), Some(150));
    }

    #[test]
    fn test_document_tolerates_missing_fields() {
        let doc: StateDocument = serde_json::from_str(r#"{"queue":[]}"#).unwrap();
        assert!(doc.delegations.is_empty());
        assert!(!doc.agent.busy);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&DelegationStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
