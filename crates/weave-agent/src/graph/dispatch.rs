use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use weave_core::catalog::AgentCatalog;
use weave_core::error::WeaveError;
use weave_core::traits::{AuditSink, LlmClient};
use weave_core::types::{AuditRecord, ChatMessage, CompletionRequest, Step, StepKind, StepOutcome};
use weave_tools::ToolRegistry;

/// Longest a step waits on the audit sink before moving on.
const AUDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes a step to an agent or a tool and turns every failure into a
/// [`StepOutcome::Failure`] carrying the error text.
///
/// Each outcome is also handed to the audit sink; sink errors and sinks
/// slower than [`AUDIT_TIMEOUT`] are logged and otherwise ignored, so a
/// stuck sink cannot hold a ready set at its barrier.
pub struct StepDispatcher {
    catalog: Arc<AgentCatalog>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    audit: Arc<dyn AuditSink>,
    default_model: String,
}

impl StepDispatcher {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        audit: Arc<dyn AuditSink>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            llm,
            tools,
            audit,
            default_model: default_model.into(),
        }
    }

    /// Run one step with already-resolved params. Never fails.
    pub async fn dispatch(&self, step: &Step, params: Value) -> StepOutcome {
        let outcome = match step.kind {
            StepKind::Agent => self.run_agent(&step.name, &params).await,
            StepKind::Tool => self.run_tool(&step.name, params).await,
        };

        let record = AuditRecord::StepOutput {
            step_id: step.id.clone(),
            kind: step.kind,
            name: step.name.clone(),
            outcome: outcome.clone(),
            timestamp: Utc::now(),
        };
        match tokio::time::timeout(AUDIT_TIMEOUT, self.audit.record(record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(step_id = %step.id, error = %e, "Failed to persist step output"),
            Err(_) => warn!(
                step_id = %step.id,
                timeout_secs = AUDIT_TIMEOUT.as_secs(),
                "Audit sink timed out, step output not persisted"
            ),
        }

        outcome
    }

    async fn run_agent(&self, name: &str, params: &Value) -> StepOutcome {
        let spec = match self.catalog.require(name) {
            Ok(spec) => spec,
            Err(e) => return StepOutcome::Failure(agent_error(name, &e)),
        };

        let request = CompletionRequest {
            model: spec
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: vec![
                ChatMessage::system(spec.system_prompt.clone()),
                ChatMessage::user(agent_input(params)),
            ],
            temperature: spec.temperature,
        };
        debug!(agent = name, model = %request.model, "Calling agent");

        match AssertUnwindSafe(self.llm.complete(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(text)) => StepOutcome::text(text),
            Ok(Err(e)) => StepOutcome::Failure(agent_error(name, &e)),
            Err(panic) => StepOutcome::Failure(format!(
                "Agent {} error: {}",
                name,
                panic_message(panic.as_ref())
            )),
        }
    }

    async fn run_tool(&self, name: &str, params: Value) -> StepOutcome {
        match AssertUnwindSafe(self.tools.invoke(name, params))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => StepOutcome::Success(value),
            Ok(Err(e)) => StepOutcome::Failure(tool_error(name, &e)),
            Err(panic) => StepOutcome::Failure(format!(
                "Tool {} error: {}",
                name,
                panic_message(panic.as_ref())
            )),
        }
    }
}

/// The user message sent to an agent: its resolved params as JSON.
fn agent_input(params: &Value) -> String {
    match params {
        Value::Object(map) if map.is_empty() => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn tool_error(name: &str, e: &WeaveError) -> String {
    let message = match e {
        WeaveError::ToolExecution { message, .. } | WeaveError::ToolValidation { message, .. } => {
            message.clone()
        }
        WeaveError::ToolNotFound(_) => "tool is not registered".to_string(),
        other => other.to_string(),
    };
    format!("Tool {} error: {}", name, message)
}

fn agent_error(name: &str, e: &WeaveError) -> String {
    let message = match e {
        WeaveError::AgentNotFound(_) => "agent is not in the catalog".to_string(),
        other => other.to_string(),
    };
    format!("Agent {} error: {}", name, message)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use weave_core::catalog::AgentSpec;
    use weave_core::types::Role;
    use weave_test_utils::{FailingSink, FnTool, MemorySink, ScriptedLlm};

    fn step(id: &str, kind: StepKind, name: &str) -> Step {
        Step {
            id: id.into(),
            kind,
            name: name.into(),
            params: json!({}),
            depends_on: Default::default(),
        }
    }

    fn dispatcher(
        llm: Arc<ScriptedLlm>,
        tools: ToolRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> StepDispatcher {
        let catalog = AgentCatalog::from_specs([
            AgentSpec::new("NetAgent", "You explain network facts.").with_temperature(0.2),
            AgentSpec::new("Pinned", "Pinned model.").with_model("small-model"),
        ]);
        StepDispatcher::new(Arc::new(catalog), llm, Arc::new(tools), audit, "default-model")
    }

    #[tokio::test]
    async fn test_agent_step_builds_request() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text("Your IP is private.");
        let d = dispatcher(llm.clone(), ToolRegistry::new(), Arc::new(MemorySink::new()));

        let out = d
            .dispatch(&step("s2", StepKind::Agent, "NetAgent"), json!({"ip": "10.0.0.5"}))
            .await;
        assert_eq!(out, StepOutcome::text("Your IP is private."));

        let req = &llm.requests()[0];
        assert_eq!(req.model, "default-model");
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content, "You explain network facts.");
        assert!(req.messages[1].content.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_agent_model_override() {
        let llm = Arc::new(ScriptedLlm::new().with_default("ok"));
        let d = dispatcher(llm.clone(), ToolRegistry::new(), Arc::new(MemorySink::new()));
        d.dispatch(&step("s1", StepKind::Agent, "Pinned"), json!({})).await;
        assert_eq!(llm.requests()[0].model, "small-model");
    }

    #[tokio::test]
    async fn test_unknown_agent_is_failure_outcome() {
        let llm = Arc::new(ScriptedLlm::new());
        let d = dispatcher(llm.clone(), ToolRegistry::new(), Arc::new(MemorySink::new()));
        let out = d.dispatch(&step("s1", StepKind::Agent, "Ghost"), json!({})).await;
        assert_eq!(
            out,
            StepOutcome::Failure("Agent Ghost error: agent is not in the catalog".into())
        );
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_llm_error_is_failure_outcome() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_error("HTTP 500: down");
        let d = dispatcher(llm, ToolRegistry::new(), Arc::new(MemorySink::new()));
        let out = d.dispatch(&step("s1", StepKind::Agent, "NetAgent"), json!({})).await;
        assert!(out.render().starts_with("Agent NetAgent error: "));
        assert!(out.render().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_tool_success_and_failure() {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::returning("get_ip_address", json!("10.0.0.5")));
        tools.register(FnTool::failing("get_storage_info", "permission denied"));
        let d = dispatcher(Arc::new(ScriptedLlm::new()), tools, Arc::new(MemorySink::new()));

        let ok = d
            .dispatch(&step("s1", StepKind::Tool, "get_ip_address"), json!({}))
            .await;
        assert_eq!(ok, StepOutcome::text("10.0.0.5"));

        let failed = d
            .dispatch(&step("s2", StepKind::Tool, "get_storage_info"), json!({}))
            .await;
        assert_eq!(
            failed,
            StepOutcome::Failure("Tool get_storage_info error: permission denied".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_args() {
        let mut tools = ToolRegistry::new();
        tools.register(
            FnTool::returning("get_ip_address", json!("x"))
                .with_schema(json!({"type": "object", "properties": {}})),
        );
        let d = dispatcher(Arc::new(ScriptedLlm::new()), tools, Arc::new(MemorySink::new()));

        let missing = d.dispatch(&step("s1", StepKind::Tool, "nope"), json!({})).await;
        assert_eq!(missing.render(), "Tool nope error: tool is not registered");

        let bad = d
            .dispatch(&step("s2", StepKind::Tool, "get_ip_address"), json!({"iface": "eth0"}))
            .await;
        assert_eq!(
            bad.render(),
            "Tool get_ip_address error: unexpected argument 'iface'"
        );
    }

    #[tokio::test]
    async fn test_tool_panic_is_contained() {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::new("explode", |_| panic!("kaboom")));
        let d = dispatcher(Arc::new(ScriptedLlm::new()), tools, Arc::new(MemorySink::new()));
        let out = d.dispatch(&step("s1", StepKind::Tool, "explode"), json!({})).await;
        assert_eq!(out.render(), "Tool explode error: panicked: kaboom");
    }

    #[tokio::test]
    async fn test_outcomes_are_audited() {
        let sink = Arc::new(MemorySink::new());
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::returning("get_ip_address", json!("10.0.0.5")));
        let d = dispatcher(Arc::new(ScriptedLlm::new()), tools, sink.clone());
        d.dispatch(&step("s1", StepKind::Tool, "get_ip_address"), json!({}))
            .await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        match &records[0] {
            AuditRecord::StepOutput { step_id, name, .. } => {
                assert_eq!(step_id, "s1");
                assert_eq!(name, "get_ip_address");
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    struct StuckSink;

    impl AuditSink for StuckSink {
        fn record(&self, _record: AuditRecord) -> BoxFuture<'_, weave_core::error::Result<()>> {
            Box::pin(futures::future::pending::<weave_core::error::Result<()>>())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_audit_sink_does_not_block_step() {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::returning("get_ip_address", json!("10.0.0.5")));
        let d = dispatcher(Arc::new(ScriptedLlm::new()), tools, Arc::new(StuckSink));

        let started = tokio::time::Instant::now();
        let out = d
            .dispatch(&step("s1", StepKind::Tool, "get_ip_address"), json!({}))
            .await;
        assert_eq!(out, StepOutcome::text("10.0.0.5"));
        assert!(started.elapsed() >= AUDIT_TIMEOUT);
        assert!(started.elapsed() < AUDIT_TIMEOUT * 2);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_outcome() {
        let mut tools = ToolRegistry::new();
        tools.register(FnTool::returning("get_ip_address", json!("10.0.0.5")));
        let d = dispatcher(Arc::new(ScriptedLlm::new()), tools, Arc::new(FailingSink));
        let out = d
            .dispatch(&step("s1", StepKind::Tool, "get_ip_address"), json!({}))
            .await;
        assert_eq!(out, StepOutcome::text("10.0.0.5"));
    }
}
