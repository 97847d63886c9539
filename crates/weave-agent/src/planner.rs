use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use weave_core::catalog::AgentCatalog;
use weave_core::config::PlannerConfig;
use weave_core::error::{Result, WeaveError};
use weave_core::event::EventBus;
use weave_core::traits::LlmClient;
use weave_core::types::{ChatMessage, CompletionRequest, EngineEvent, RawPlan, ToolDefinition};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an orchestrator. You break a user's request into \
a small plan of agent and tool calls and answer with JSON only.";

/// Turns a request (with its conversation context) into a raw plan.
///
/// The reply must parse as `{"steps": [...]}`. Provider errors and malformed
/// replies are retried with a linearly growing pause; once every attempt has
/// failed the turn is abandoned with `PlannerExhausted`.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    config: PlannerConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, config: PlannerConfig) -> Self {
        Self {
            llm,
            config,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Ask the planner model for a plan.
    pub async fn plan(
        &self,
        context: &str,
        catalog: &AgentCatalog,
        tools: &[ToolDefinition],
    ) -> Result<RawPlan> {
        let orchestrator = catalog.orchestrator();
        let system = orchestrator
            .map(|o| o.system_prompt.clone())
            .or_else(|| self.config.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let temperature = orchestrator
            .map(|o| o.temperature)
            .unwrap_or(self.config.temperature);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(system.clone()),
                ChatMessage::user(build_prompt(&system, context, catalog, tools)),
            ],
            temperature,
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let reply = self.llm.complete(request.clone()).await;
            match reply.and_then(|text| parse_plan(&text)) {
                Ok((plan, value)) => {
                    info!(attempt, steps = plan.steps.len(), "Planner produced a plan");
                    self.publish(EngineEvent::PlanProposed { plan: value });
                    return Ok(plan);
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Planner attempt failed");
                    self.publish(EngineEvent::PlannerRetry {
                        attempt,
                        error: e.to_string(),
                    });
                    last_error = e.to_string();
                    if attempt < attempts {
                        let backoff = self.config.retry_backoff_ms.saturating_mul(attempt as u64);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(WeaveError::PlannerExhausted {
            attempts,
            message: last_error,
        })
    }
}

/// The planner prompt: available agents and tools, the context, and the
/// required reply shape.
pub fn build_prompt(
    system: &str,
    context: &str,
    catalog: &AgentCatalog,
    tools: &[ToolDefinition],
) -> String {
    let agents_text = catalog
        .callable()
        .map(|a| {
            format!(
                "- {}: {} params={:?}",
                a.name, a.description, a.expected_params
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let tools_text = tools
        .iter()
        .map(|t| format!("- {}: params={:?} desc={}", t.name, t.param_names(), t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"System: {system}

Available agents:
{agents_text}

Available tools:
{tools_text}

User request:
{context}

Return ONLY valid JSON with this shape:
{{
  "steps": [
    {{"id":"s1","type":"agent|tool","name":"...","params":{{...}}, "depends_on": ["s0"]}}
  ]
}}

Notes:
- Use `agent` steps to call other agents. Use `tool` steps to call low-level tools.
- Provide explicit `depends_on` for steps that need outputs from previous steps.
- Reference an earlier step's output in params as "{{<step id>}}"; the original request is "{{initial_request}}".
- Keep plan concise and deterministic.
"#
    )
}

/// Parse a planner reply, tolerating a surrounding Markdown code fence.
///
/// Returns the typed plan and the JSON it came from.
pub fn parse_plan(text: &str) -> Result<(RawPlan, serde_json::Value)> {
    let body = strip_code_fence(text);
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| WeaveError::LlmParse(format!("planner reply is not JSON: {}", e)))?;
    debug!(bytes = body.len(), "Planner reply parsed");
    let plan = RawPlan::from_value(value.clone())?;
    Ok((plan, value))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (```json)
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_core::catalog::{AgentSpec, ORCHESTRATOR_AGENT};
    use weave_test_utils::ScriptedLlm;

    const PLAN: &str = r#"{"steps": [{"id": "s1", "type": "tool", "name": "get_ip_address"}]}"#;

    fn catalog() -> AgentCatalog {
        AgentCatalog::from_specs([
            AgentSpec::new(ORCHESTRATOR_AGENT, "You plan.").with_temperature(0.3),
            AgentSpec::new("NetAgent", "Explain networks.")
                .with_description("Network expert")
                .with_expected_params(vec!["ip".into()]),
        ])
    }

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "get_storage_info".into(),
            description: "Disk usage".into(),
            input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }]
    }

    fn planner(llm: Arc<ScriptedLlm>, max_retries: u32) -> Planner {
        let mut config = PlannerConfig::new("planner-model");
        config.max_retries = max_retries;
        config.retry_backoff_ms = 1500;
        Planner::new(llm, config)
    }

    #[test]
    fn test_prompt_lists_agents_and_tools() {
        let prompt = build_prompt("You plan.", "What is my IP?", &catalog(), &tools());
        assert!(prompt.contains("- NetAgent: Network expert params=[\"ip\"]"));
        assert!(prompt.contains("- get_storage_info: params=[\"path\"] desc=Disk usage"));
        assert!(prompt.contains("User request:\nWhat is my IP?"));
        assert!(!prompt.contains("- orchestrator_agent"));
        assert!(prompt.contains(r#""steps": ["#));
    }

    #[test]
    fn test_parse_plan_with_code_fence() {
        let (plan, value) = parse_plan(&format!("```json\n{}\n```", PLAN)).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(value["steps"][0]["id"], "s1");
        assert!(parse_plan(&format!("```\n{}\n```", PLAN)).is_ok());
    }

    #[test]
    fn test_parse_plan_rejects_bad_shapes() {
        assert!(matches!(parse_plan("not json"), Err(WeaveError::LlmParse(_))));
        assert!(matches!(parse_plan(r#"{"plan": []}"#), Err(WeaveError::LlmParse(_))));
        assert!(matches!(parse_plan(r#"{"steps": "s1"}"#), Err(WeaveError::LlmParse(_))));
    }

    #[tokio::test]
    async fn test_plan_uses_orchestrator_entry() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(PLAN);
        let plan = planner(llm.clone(), 3)
            .plan("What is my IP?", &catalog(), &tools())
            .await
            .unwrap();
        assert_eq!(plan.steps[0].name.as_deref(), Some("get_ip_address"));

        let req = &llm.requests()[0];
        assert_eq!(req.model, "planner-model");
        assert_eq!(req.temperature, 0.3);
        assert_eq!(req.messages[0].content, "You plan.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_malformed_then_succeeds() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text("I think you should call get_ip_address")
            .push_error("HTTP 500: down")
            .push_text(PLAN);

        let started = tokio::time::Instant::now();
        let plan = planner(llm.clone(), 3)
            .with_event_bus(bus)
            .plan("q", &AgentCatalog::new(), &[])
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(llm.call_count(), 3);
        // 1500ms after the first failure, 3000ms after the second
        assert!(started.elapsed() >= Duration::from_millis(4500));

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["planner_error", "planner_error", "planner_ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let llm = Arc::new(ScriptedLlm::new().with_default("still not json"));
        let err = planner(llm.clone(), 2)
            .plan("q", &AgentCatalog::new(), &[])
            .await
            .unwrap_err();
        assert_eq!(llm.call_count(), 2);
        match err {
            WeaveError::PlannerExhausted { attempts, message } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("not JSON"));
            }
            other => panic!("expected PlannerExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_configured_prompt() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(PLAN);
        let mut config = PlannerConfig::new("m");
        config.system_prompt = Some("Plan carefully.".into());
        config.temperature = 0.7;
        Planner::new(llm.clone(), config)
            .plan("q", &AgentCatalog::new(), &[])
            .await
            .unwrap();
        let req = &llm.requests()[0];
        assert_eq!(req.messages[0].content, "Plan carefully.");
        assert_eq!(req.temperature, 0.7);
    }
}
