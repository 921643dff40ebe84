//! Multi-context capability prober.
//!
//! The host runs several isolated script contexts and only some of them expose
//! a given capability at any moment. [`ContextProber`] walks the contexts from
//! newest to oldest, probes each with a cheap boolean check and runs the action
//! in the first one that answers, retrying whole sweeps a bounded number of times.

use std::{sync::Arc, time::Duration};

use agent_relay_core::{CapabilityScript, RelayConfig, config::ProberConfig};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{CdpError, connection::ExecutionContext};

/// Script evaluation in a specific context.
#[async_trait]
pub trait ContextEvaluator: Send + Sync {
    /// Known contexts, most recently created first.
    fn contexts(&self) -> Vec<ExecutionContext>;

    /// Evaluate `expression` in `context_id` and return its value.
    async fn evaluate(
        &self,
        context_id: i64,
        expression: &str,
        timeout: Duration,
    ) -> Result<Value, CdpError>;
}

/// A named capability expressed as a probe and an action.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    /// Expression that evaluates to `true` when the context can run the action.
    fn probe_expression(&self, arg: &Value) -> String;

    /// Expression that evaluates to (or resolves to) `{ ok, reason?, ... }`.
    fn action_expression(&self, arg: &Value) -> String;
}

/// Capability backed by configured function sources.
///
/// Each source is called with the JSON argument of the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCapability {
    name: String,
    probe: String,
    action: String,
}

impl ScriptCapability {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        probe: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            probe: probe.into(),
            action: action.into(),
        }
    }

    #[must_use]
    pub fn from_script(name: impl Into<String>, script: &CapabilityScript) -> Self {
        Self::new(name, script.probe.clone(), script.action.clone())
    }

    /// A capability no context ever offers.
    #[must_use]
    pub fn unconfigured(name: impl Into<String>) -> Self {
        Self::new(
            name,
            "() => false",
            "() => ({ ok: false, reason: 'not_configured' })",
        )
    }

    /// Look up `name` in the configuration, falling back to [`Self::unconfigured`].
    #[must_use]
    pub fn from_config(name: &str, config: &RelayConfig) -> Self {
        config.capability(name).map_or_else(
            || Self::unconfigured(name),
            |script| Self::from_script(name, script),
        )
    }

    fn call(source: &str, arg: &Value) -> String {
        format!("({source})({arg})")
    }
}

impl Capability for ScriptCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe_expression(&self, arg: &Value) -> String {
        Self::call(&self.probe, arg)
    }

    fn action_expression(&self, arg: &Value) -> String {
        Self::call(&self.action, arg)
    }
}

/// Result of running a capability across contexts.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The action reported `ok: true`.
    Delivered { context_id: i64, report: Value },
    /// The action reported the agent busy; no further context was tried.
    Busy { context_id: i64 },
    /// Every sweep finished without a success or a busy signal.
    CapabilityNotFound { sweeps: u32 },
}

impl ProbeOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Structured `{ ok, ... }` form handed back to callers.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Delivered { report, .. } => report,
            Self::Busy { .. } => json!({ "ok": false, "reason": "busy" }),
            Self::CapabilityNotFound { .. } => {
                json!({ "ok": false, "reason": "capability_not_found" })
            }
        }
    }
}

/// Runs a capability somewhere in the host.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, capability: &dyn Capability, arg: &Value) -> ProbeOutcome;
}

enum ActionReport {
    Ok(Value),
    Busy,
    Declined,
}

impl ActionReport {
    fn classify(report: Value) -> Self {
        match report.get("ok").and_then(Value::as_bool) {
            Some(true) => Self::Ok(report),
            Some(false) if report.get("reason").and_then(Value::as_str) == Some("busy") => {
                Self::Busy
            }
            _ => Self::Declined,
        }
    }
}

/// Finds the context able to run a capability and runs it there.
pub struct ContextProber {
    evaluator: Arc<dyn ContextEvaluator>,
    settings: ProberConfig,
}

impl ContextProber {
    /// Create a new prober.
    #[must_use]
    pub fn new(evaluator: Arc<dyn ContextEvaluator>, settings: ProberConfig) -> Self {
        Self {
            evaluator,
            settings,
        }
    }

    /// Probe and run `capability` with `arg`.
    ///
    /// Never fails: probe errors skip the context, action errors move on to the
    /// next context, and exhausting every sweep yields `CapabilityNotFound`.
    pub async fn execute(&self, capability: &dyn Capability, arg: &Value) -> ProbeOutcome {
        let probe_timeout = Duration::from_millis(self.settings.probe_timeout_ms);
        let action_timeout = Duration::from_millis(self.settings.action_timeout_ms);
        let probe = capability.probe_expression(arg);
        let action = capability.action_expression(arg);
        let sweeps = self.settings.sweeps.max(1);

        for sweep in 1..=sweeps {
            let contexts = self.evaluator.contexts();
            tracing::debug!(
                capability = capability.name(),
                sweep,
                contexts = contexts.len(),
                "Probing contexts"
            );

            for context in contexts {
                match self.evaluator.evaluate(context.id, &probe, probe_timeout).await {
                    Ok(Value::Bool(true)) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::debug!(
                            context_id = context.id,
                            session_lost = err.is_connection_error(),
                            %err,
                            "Probe failed"
                        );
                        continue;
                    }
                }

                match self.evaluator.evaluate(context.id, &action, action_timeout).await {
                    Ok(report) => match ActionReport::classify(report) {
                        ActionReport::Ok(report) => {
                            tracing::debug!(
                                capability = capability.name(),
                                context_id = context.id,
                                "Capability delivered"
                            );
                            return ProbeOutcome::Delivered {
                                context_id: context.id,
                                report,
                            };
                        }
                        ActionReport::Busy => {
                            tracing::debug!(
                                capability = capability.name(),
                                context_id = context.id,
                                "Agent busy"
                            );
                            return ProbeOutcome::Busy {
                                context_id: context.id,
                            };
                        }
                        ActionReport::Declined => {
                            tracing::debug!(context_id = context.id, "Action declined");
                        }
                    },
                    Err(err) => {
                        tracing::debug!(
                            context_id = context.id,
                            session_lost = err.is_connection_error(),
                            %err,
                            "Action failed"
                        );
                    }
                }
            }

            if sweep < sweeps {
                tokio::time::sleep(Duration::from_millis(self.settings.sweep_pause_ms)).await;
            }
        }

        tracing::debug!(capability = capability.name(), sweeps, "Capability not found");
        ProbeOutcome::CapabilityNotFound { sweeps }
    }
}

#[async_trait]
impl ActionRunner for ContextProber {
    async fn run(&self, capability: &dyn Capability, arg: &Value) -> ProbeOutcome {
        self.execute(capability, arg).await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    const PAUSE_MS: u64 = 900;

    /// Scripted host: each context answers the probe and the action with a
    /// fixed result, and every evaluation is recorded.
    #[derive(Default)]
    struct FakeEvaluator {
        contexts: Mutex<Vec<ExecutionContext>>,
        probes: Mutex<HashMap<i64, Result<Value, String>>>,
        actions: Mutex<HashMap<i64, Result<Value, String>>>,
        log: Mutex<Vec<(i64, &'static str)>>,
    }

    impl FakeEvaluator {
        fn add_context(
            &self,
            id: i64,
            probe: Result<Value, String>,
            action: Result<Value, String>,
        ) {
            let mut contexts = self.contexts.lock().unwrap();
            let order = contexts.len() as u64 + 1;
            contexts.insert(
                0,
                ExecutionContext {
                    id,
                    origin: "app".into(),
                    name: String::new(),
                    created_order: order,
                },
            );
            self.probes.lock().unwrap().insert(id, probe);
            self.actions.lock().unwrap().insert(id, action);
        }

        fn log(&self) -> Vec<(i64, &'static str)> {
            self.log.lock().unwrap().clone()
        }

        fn actions_run(&self) -> Vec<i64> {
            self.log()
                .into_iter()
                .filter(|(_, kind)| *kind == "action")
                .map(|(id, _)| id)
                .collect()
        }
    }

    #[async_trait]
    impl ContextEvaluator for FakeEvaluator {
        fn contexts(&self) -> Vec<ExecutionContext> {
            self.contexts.lock().unwrap().clone()
        }

        async fn evaluate(
            &self,
            context_id: i64,
            expression: &str,
            _timeout: Duration,
        ) -> Result<Value, CdpError> {
            let (kind, table) = if expression.starts_with("(PROBE)") {
                ("probe", &self.probes)
            } else {
                ("action", &self.actions)
            };
            self.log.lock().unwrap().push((context_id, kind));
            let answer = table.lock().unwrap().get(&context_id).cloned();
            match answer {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(CdpError::Protocol {
                    code: -32000,
                    message,
                }),
                None => Err(CdpError::Protocol {
                    code: -32000,
                    message: "Cannot find context with specified id".into(),
                }),
            }
        }
    }

    fn capability() -> ScriptCapability {
        ScriptCapability::new("send_message", "PROBE", "ACTION")
    }

    fn prober(evaluator: &Arc<FakeEvaluator>) -> ContextProber {
        ContextProber::new(
            evaluator.clone(),
            ProberConfig {
                sweep_pause_ms: PAUSE_MS,
                ..ProberConfig::default()
            },
        )
    }

    fn yes() -> Result<Value, String> {
        Ok(Value::Bool(true))
    }

    #[test]
    fn test_script_expressions_embed_argument() {
        let cap = ScriptCapability::new(
            "focus_target",
            "(a) => !!a.target",
            "async (a) => ({ ok: true })",
        );
        let arg = json!({ "target": "tab-2" });
        assert_eq!(cap.probe_expression(&arg), r#"((a) => !!a.target)({"target":"tab-2"})"#);
        assert!(cap.action_expression(&arg).starts_with("(async (a)"));
    }

    #[tokio::test]
    async fn test_busy_stops_at_first_context() {
        let evaluator = Arc::new(FakeEvaluator::default());
        evaluator.add_context(1, yes(), Ok(json!({ "ok": true })));
        evaluator.add_context(2, yes(), Ok(json!({ "ok": false, "reason": "busy" })));

        let outcome = prober(&evaluator).execute(&capability(), &json!({ "text": "hi" })).await;

        assert_eq!(outcome, ProbeOutcome::Busy { context_id: 2 });
        assert_eq!(evaluator.actions_run(), [2]);
        assert_eq!(outcome.into_value(), json!({ "ok": false, "reason": "busy" }));
    }

    #[tokio::test]
    async fn test_newest_context_is_tried_first_and_declines_continue() {
        let evaluator = Arc::new(FakeEvaluator::default());
        evaluator.add_context(1, yes(), Ok(json!({ "ok": true, "via": 1 })));
        evaluator.add_context(2, Ok(Value::Bool(false)), Ok(json!({ "ok": true })));
        evaluator.add_context(3, yes(), Ok(json!({ "ok": false, "reason": "no_input" })));

        let outcome = prober(&evaluator).execute(&capability(), &Value::Null).await;

        assert!(outcome.is_delivered());
        assert_eq!(
            outcome,
            ProbeOutcome::Delivered {
                context_id: 1,
                report: json!({ "ok": true, "via": 1 })
            }
        );
        assert_eq!(
            evaluator.log(),
            [(3, "probe"), (3, "action"), (2, "probe"), (1, "probe"), (1, "action")]
        );
    }

    #[tokio::test]
    async fn test_probe_and_action_errors_skip_the_context() {
        let evaluator = Arc::new(FakeEvaluator::default());
        evaluator.add_context(1, yes(), Ok(json!({ "ok": true })));
        evaluator.add_context(2, yes(), Err("Execution context was destroyed".into()));
        evaluator.add_context(3, Err("Cannot find context".into()), Ok(json!({ "ok": true })));

        let outcome = prober(&evaluator).execute(&capability(), &Value::Null).await;

        assert!(matches!(outcome, ProbeOutcome::Delivered { context_id: 1, .. }));
        assert_eq!(evaluator.actions_run(), [2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_after_all_sweeps() {
        let evaluator = Arc::new(FakeEvaluator::default());
        evaluator.add_context(1, Ok(Value::Bool(false)), Ok(json!({ "ok": true })));

        let started = tokio::time::Instant::now();
        let outcome = prober(&evaluator).execute(&capability(), &Value::Null).await;

        assert_eq!(outcome, ProbeOutcome::CapabilityNotFound { sweeps: 3 });
        assert_eq!(evaluator.log(), [(1, "probe"), (1, "probe"), (1, "probe")]);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(PAUSE_MS * 2));
        assert!(elapsed < Duration::from_millis(PAUSE_MS * 3));
        assert_eq!(
            outcome.into_value(),
            json!({ "ok": false, "reason": "capability_not_found" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_created_between_sweeps_is_found() {
        let evaluator = Arc::new(FakeEvaluator::default());
        let late = evaluator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(PAUSE_MS / 2)).await;
            late.add_context(9, yes(), Ok(json!({ "ok": true })));
        });

        let outcome = prober(&evaluator).execute(&capability(), &Value::Null).await;

        assert!(matches!(outcome, ProbeOutcome::Delivered { context_id: 9, .. }));
    }

    #[test]
    fn test_unconfigured_capability_never_matches() {
        let cap = ScriptCapability::from_config("switch_model", &RelayConfig::default());
        assert_eq!(cap.name(), "switch_model");
        assert!(cap.probe_expression(&Value::Null).contains("() => false"));
    }
}
