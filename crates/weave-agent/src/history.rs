use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use weave_core::types::{RawPlan, StepKind};

use crate::graph::ResultStore;

/// One completed request/answer exchange.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_input: String,
    pub response: String,
    pub plan: RawPlan,
    /// Step outcomes by step id; failures appear as their error text.
    pub results: BTreeMap<String, Value>,
}

impl Turn {
    pub fn new(
        user_input: impl Into<String>,
        response: impl Into<String>,
        plan: RawPlan,
        results: &ResultStore,
    ) -> Self {
        Self {
            user_input: user_input.into(),
            response: response.into(),
            plan,
            results: results
                .step_results()
                .map(|(id, outcome)| (id.to_string(), outcome.to_value()))
                .collect(),
        }
    }

    /// Outputs of this turn's tool steps, keyed by tool name.
    fn tool_outputs(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.plan.steps.iter().filter_map(|step| {
            let is_tool = step.kind.as_deref().and_then(StepKind::parse) == Some(StepKind::Tool);
            // results are keyed by the trimmed ids the plan graph validated
            let id = step.id.as_deref()?.trim();
            let name = step.name.as_deref()?.trim();
            let value = self.results.get(id)?;
            is_tool.then_some((name, value))
        })
    }
}

/// Multi-turn conversation memory used to give the planner context.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    max_window: usize,
}

impl ConversationHistory {
    pub fn new(max_window: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_window,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Render the planner's view of the conversation, ending with the
    /// current request.
    pub fn build_planner_context(&self, current_input: &str) -> String {
        let split = self.turns.len().saturating_sub(self.max_window);
        let (older, recent) = self.turns.split_at(split);

        let summary = summarize(older);

        let mut gathered: BTreeMap<&str, &Value> = BTreeMap::new();
        for turn in recent {
            gathered.extend(turn.tool_outputs());
        }
        let info_text = if gathered.is_empty() {
            "No information has been gathered yet.".to_string()
        } else {
            serde_json::to_string_pretty(&gathered).unwrap_or_default()
        };

        let recent_text = recent
            .iter()
            .map(|t| {
                format!(
                    "User's previous message was: '{}'. Final response was: '{}'.",
                    t.user_input, t.response
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "CONVERSATION SUMMARY:\n{summary}\n\n\
             RECENT TURNS:\n{recent_text}\n\n\
             PREVIOUSLY GATHERED INFORMATION:\n\
             This is a JSON object of tool names and their outputs from recent turns. \
             If the user's current request can be answered using this information, you don't \
             need to call the same tool again for information that is static (e.g., OS version).\n\
             {info_text}\n\n\
             CURRENT USER REQUEST:\n{current_input}"
        )
    }
}

/// Truncation summary of turns that fell out of the window.
fn summarize(turns: &[Turn]) -> String {
    let Some(first) = turns.first() else {
        return String::new();
    };
    let mut summary = format!(
        "Conversation started with user asking: '{}'. Assistant's initial response was: '{}'.",
        first.user_input, first.response
    );
    if turns.len() > 1 {
        summary.push_str(&format!(
            "\n... ({} older turn(s) omitted for brevity) ...",
            turns.len() - 1
        ));
    }
    debug!(turns_summarized = turns.len(), "History summarized");
    summary
}
