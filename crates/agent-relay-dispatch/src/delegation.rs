//! Delegation supervisor.
//!
//! A delegation hands a task to a target tab: focus the target, optionally
//! switch its model, then queue the task text for busy-aware delivery.
//!
//! Status flow: `pending -> in_progress -> completed | failed | timeout`.
//! Deadlines are only checked when delegations are listed; a delegation that
//! is never listed stays `in_progress` past its deadline.

use std::{sync::Arc, time::Duration};

use agent_relay_cdp::{ActionRunner, Capability, ProbeOutcome};
use agent_relay_core::{
    Delegation, DelegationPriority, DelegationStatus, EventBus, StateHandle,
    config::DelegationConfig, event_bus::names, now_millis,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    ActionQueue, DispatchError,
    models::{ModelSelector, ResolvedModel},
};

/// Parameters of a new delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDelegation {
    pub target_tab: String,
    pub task: String,
    #[serde(default)]
    pub model: Option<ModelSelector>,
    #[serde(default)]
    pub priority: Option<DelegationPriority>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Narrows a listing; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationFilter {
    #[serde(default)]
    pub status: Option<DelegationStatus>,
    #[serde(default)]
    pub target_tab: Option<String>,
}

impl DelegationFilter {
    fn matches(&self, record: &Delegation) -> bool {
        self.status.is_none_or(|status| record.status == status)
            && self
                .target_tab
                .as_deref()
                .is_none_or(|tab| record.target_tab == tab)
    }
}

/// Per-status counts of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
}

impl DelegationSummary {
    fn count(&mut self, status: DelegationStatus) {
        self.total += 1;
        match status {
            DelegationStatus::Pending => self.pending += 1,
            DelegationStatus::InProgress => self.in_progress += 1,
            DelegationStatus::Completed => self.completed += 1,
            DelegationStatus::Failed => self.failed += 1,
            DelegationStatus::Timeout => self.timeout += 1,
        }
    }
}

/// Records matching a filter plus their summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationListing {
    pub records: Vec<Delegation>,
    pub summary: DelegationSummary,
}

/// Result of [`DelegationSupervisor::accept`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AcceptOutcome {
    Accepted(Delegation),
    Rejected { ok: bool, reason: &'static str },
}

impl AcceptOutcome {
    const fn already_completed() -> Self {
        Self::Rejected {
            ok: false,
            reason: "already_completed",
        }
    }
}

/// Owns the delegation records and drives their hand-off.
pub struct DelegationSupervisor {
    state: Arc<StateHandle>,
    bus: Arc<EventBus>,
    runner: Arc<dyn ActionRunner>,
    focus_target: Arc<dyn Capability>,
    switch_model: Arc<dyn Capability>,
    queue: Arc<ActionQueue>,
    settings: DelegationConfig,
}

impl DelegationSupervisor {
    /// Create a new supervisor.
    #[must_use]
    pub fn new(
        state: Arc<StateHandle>,
        bus: Arc<EventBus>,
        runner: Arc<dyn ActionRunner>,
        focus_target: Arc<dyn Capability>,
        switch_model: Arc<dyn Capability>,
        queue: Arc<ActionQueue>,
        settings: DelegationConfig,
    ) -> Self {
        Self {
            state,
            bus,
            runner,
            focus_target,
            switch_model,
            queue,
            settings,
        }
    }

    /// Record a delegation and hand it to its target.
    ///
    /// A failed focus leaves the record `failed` and queues nothing; a failed
    /// model switch is logged and ignored.
    ///
    /// # Errors
    /// Returns error if the new record cannot be persisted; nothing is kept
    /// in that case.
    pub async fn create(&self, request: CreateDelegation) -> Result<Delegation, DispatchError> {
        let timeout_ms = request
            .timeout_ms
            .unwrap_or(self.settings.default_timeout_ms);
        let record = Delegation::new(
            request.target_tab,
            request.task,
            request.priority.unwrap_or_default(),
            timeout_ms,
        );

        let id = record.id.clone();
        self.state
            .mutate(|doc| doc.delegations.push(record.clone()))
            .await;
        if let Err(err) = self.state.persist().await {
            self.state
                .mutate(|doc| doc.delegations.retain(|d| d.id != id))
                .await;
            return Err(err.into());
        }
        self.publish(&record);
        tracing::info!(
            delegation_id = %id,
            target_tab = %record.target_tab,
            priority = ?record.priority,
            "Delegation created"
        );

        // Saved by the next transition.
        let model = request.model.as_ref().and_then(ModelSelector::resolve);
        match (&request.model, &model) {
            (_, Some(model)) => {
                let (name, index) = (model.entry.key.to_string(), model.index);
                self.state
                    .mutate(|doc| {
                        if let Some(d) = doc.delegations.iter_mut().find(|d| d.id == id) {
                            d.model_name = Some(name);
                            d.model_index = Some(index);
                        }
                    })
                    .await;
            }
            (Some(selector), None) => {
                tracing::debug!(?selector, "Model selector matched nothing; keeping current model");
            }
            (None, None) => {}
        }

        let focus = self
            .runner
            .run(
                self.focus_target.as_ref(),
                &json!({ "target": record.target_tab }),
            )
            .await;
        if !focus.is_delivered() {
            let error = match focus {
                ProbeOutcome::Busy { .. } => "focus failed: target busy".to_string(),
                _ => format!("focus failed: no context could focus {}", record.target_tab),
            };
            tracing::warn!(delegation_id = %id, %error, "Delegation hand-off failed");
            return self
                .transition(&id, |d| {
                    d.status = DelegationStatus::Failed;
                    d.completed_at = Some(now_millis());
                    d.error = Some(error);
                })
                .await;
        }

        if let Some(model) = model {
            self.switch(&id, model).await;
        }

        let record = self
            .transition(&id, |d| {
                d.status = DelegationStatus::InProgress;
                d.started_at = Some(now_millis());
            })
            .await?;
        self.queue
            .enqueue(record.task.clone(), format!("delegation:{id}"))
            .await;
        Ok(record)
    }

    async fn switch(&self, id: &str, model: ResolvedModel) {
        tokio::time::sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;
        let arg = json!({
            "model": model.entry.label,
            "key": model.entry.key,
            "index": model.index,
        });
        let outcome = self.runner.run(self.switch_model.as_ref(), &arg).await;
        if outcome.is_delivered() {
            tracing::debug!(delegation_id = id, model = model.entry.key, "Model switched");
        } else {
            tracing::warn!(
                delegation_id = id,
                model = model.entry.key,
                ?outcome,
                "Model switch failed; continuing"
            );
        }
    }

    /// List delegations, timing out overdue ones first.
    pub async fn list(&self, filter: &DelegationFilter) -> DelegationListing {
        let now = now_millis();
        let (expired, listing) = self
            .state
            .mutate(|doc| {
                let mut expired = Vec::new();
                for record in &mut doc.delegations {
                    if let Some(elapsed) = record.overdue_by(now) {
                        record.status = DelegationStatus::Timeout;
                        record.error = Some(format!(
                            "timed out after {elapsed} ms (limit {} ms)",
                            record.timeout_ms
                        ));
                        expired.push(record.clone());
                    }
                }

                let mut summary = DelegationSummary::default();
                let records: Vec<Delegation> = doc
                    .delegations
                    .iter()
                    .filter(|d| filter.matches(d))
                    .cloned()
                    .collect();
                for record in &records {
                    summary.count(record.status);
                }
                (expired, DelegationListing { records, summary })
            })
            .await;

        if !expired.is_empty() {
            self.state.persist_or_log().await;
            for record in &expired {
                tracing::warn!(delegation_id = %record.id, "Delegation timed out");
                self.publish(record);
            }
        }
        listing
    }

    /// Look up one delegation without evaluating its deadline.
    pub async fn get(&self, id: &str) -> Option<Delegation> {
        self.state
            .read(|doc| doc.delegations.iter().find(|d| d.id == id).cloned())
            .await
    }

    /// Finish a delegation: `failed` if `error` is given, else `completed`.
    ///
    /// # Errors
    /// Returns error if no delegation has this id.
    pub async fn complete(
        &self,
        id: &str,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<Delegation, DispatchError> {
        let record = self
            .transition(id, |d| {
                d.status = if error.is_some() {
                    DelegationStatus::Failed
                } else {
                    DelegationStatus::Completed
                };
                d.result = result;
                d.error = error;
                d.completed_at = Some(now_millis());
            })
            .await?;
        tracing::info!(delegation_id = id, status = ?record.status, "Delegation finished");
        Ok(record)
    }

    /// Claim a delegation, restarting its deadline.
    ///
    /// Any status except `completed` is forced back to `in_progress`.
    ///
    /// # Errors
    /// Returns error if no delegation has this id.
    pub async fn accept(&self, id: &str) -> Result<AcceptOutcome, DispatchError> {
        let now = now_millis();
        let outcome = self
            .state
            .mutate(|doc| {
                let record = doc.delegations.iter_mut().find(|d| d.id == id)?;
                if record.status == DelegationStatus::Completed {
                    return Some(AcceptOutcome::already_completed());
                }
                record.status = DelegationStatus::InProgress;
                record.accepted_at = Some(now);
                record.started_at = Some(now);
                record.completed_at = None;
                record.error = None;
                Some(AcceptOutcome::Accepted(record.clone()))
            })
            .await
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))?;

        match &outcome {
            AcceptOutcome::Accepted(record) => {
                self.state.persist_or_log().await;
                self.publish(record);
                tracing::info!(delegation_id = id, "Delegation accepted");
            }
            AcceptOutcome::Rejected { .. } => {
                tracing::debug!(delegation_id = id, "Accept rejected, already completed");
            }
        }
        Ok(outcome)
    }

    async fn transition(
        &self,
        id: &str,
        f: impl FnOnce(&mut Delegation),
    ) -> Result<Delegation, DispatchError> {
        let record = self
            .state
            .mutate(|doc| {
                doc.delegations.iter_mut().find(|d| d.id == id).map(|d| {
                    f(d);
                    d.clone()
                })
            })
            .await
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))?;
        self.state.persist_or_log().await;
        self.publish(&record);
        Ok(record)
    }

    fn publish(&self, record: &Delegation) {
        self.bus
            .publish(names::DELEGATION_UPDATE, json!({ "record": record }));
    }
}
