use std::sync::Arc;

use tracing::warn;

use weave_core::config::ResponderConfig;
use weave_core::traits::LlmClient;
use weave_core::types::{ChatMessage, CompletionRequest, RawPlan};

use crate::graph::ResultStore;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's request \
using only the step results provided. If a step failed, say what could not be determined.";

/// Synthesizes the final answer from the committed step results.
pub struct Responder {
    llm: Arc<dyn LlmClient>,
    config: ResponderConfig,
}

impl Responder {
    pub fn new(llm: Arc<dyn LlmClient>, config: ResponderConfig) -> Self {
        Self { llm, config }
    }

    /// Produce the answer. Falls back to [`fallback_summary`] if the model
    /// call fails, so the user always gets a reply.
    pub async fn respond(&self, user_request: &str, plan: &RawPlan, results: &ResultStore) -> String {
        let plan_json = serde_json::to_string_pretty(plan).unwrap_or_default();
        let results_json = serde_json::to_string_pretty(&results.to_json()).unwrap_or_default();
        let prompt = format!(
            "User request:\n{user_request}\n\nPlan that was executed:\n{plan_json}\n\n\
             Step results (failed steps show their error text):\n{results_json}\n\n\
             Write the final answer for the user."
        );

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(
                    self.config
                        .system_prompt
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                ),
                ChatMessage::user(prompt),
            ],
            temperature: self.config.temperature,
        };

        match self.llm.complete(request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Responder returned an empty answer, using summary");
                fallback_summary(results)
            }
            Err(e) => {
                warn!(error = %e, "Responder failed, using summary");
                fallback_summary(results)
            }
        }
    }
}

/// Plain-text listing of every step outcome.
pub fn fallback_summary(results: &ResultStore) -> String {
    if results.is_empty() {
        return "No steps were run for this request.".to_string();
    }
    let lines: Vec<String> = results
        .step_results()
        .map(|(id, outcome)| {
            let status = if outcome.is_success() { "ok" } else { "failed" };
            format!("- {} ({}): {}", id, status, outcome.render())
        })
        .collect();
    format!("Results:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_core::types::StepOutcome;
    use weave_test_utils::ScriptedLlm;

    fn results() -> ResultStore {
        let mut store = ResultStore::new("How much disk is free?");
        store
            .commit_batch(vec![
                ("disk".into(), StepOutcome::Success(json!({"free_gb": 120.5}))),
                ("os".into(), StepOutcome::Failure("Tool get_os_info error: boom".into())),
            ])
            .unwrap();
        store
    }

    fn config() -> ResponderConfig {
        ResponderConfig {
            model: "answer-model".into(),
            temperature: 0.1,
            system_prompt: None,
        }
    }

    #[tokio::test]
    async fn test_respond_sends_results() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text("  You have 120.5 GB free.  ");
        let answer = Responder::new(llm.clone(), config())
            .respond("How much disk is free?", &RawPlan::default(), &results())
            .await;
        assert_eq!(answer, "You have 120.5 GB free.");

        let req = &llm.requests()[0];
        assert_eq!(req.model, "answer-model");
        let prompt = &req.messages[1].content;
        assert!(prompt.contains("How much disk is free?"));
        assert!(prompt.contains("120.5"));
        assert!(prompt.contains("Tool get_os_info error: boom"));
    }

    #[tokio::test]
    async fn test_falls_back_on_error() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_error("HTTP 503: busy");
        let answer = Responder::new(llm, config())
            .respond("q", &RawPlan::default(), &results())
            .await;
        assert_eq!(
            answer,
            "Results:\n- disk (ok): {\"free_gb\":120.5}\n- os (failed): Tool get_os_info error: boom"
        );
    }

    #[test]
    fn test_summary_of_empty_results() {
        assert_eq!(
            fallback_summary(&ResultStore::new("hi")),
            "No steps were run for this request."
        );
    }
}
