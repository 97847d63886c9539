use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaveError};

/// Reserved result-store key holding the user's original request.
pub const INITIAL_REQUEST_KEY: &str = "initial_request";

/// What a step invokes.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Agent,
    Tool,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Tool => "tool",
        }
    }

    /// Parse the wire `type` field.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step exactly as the planner emitted it.
///
/// Every field is optional so that missing fields surface as plan validation
/// errors rather than JSON parse failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

impl RawStep {
    pub fn new(id: impl Into<String>, kind: StepKind, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some(kind.as_str().to_string()),
            name: Some(name.into()),
            params: None,
            depends_on: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = Some(deps);
        self
    }
}

/// The `{"steps": [...]}` document produced by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlan {
    pub steps: Vec<RawStep>,
}

impl RawPlan {
    /// Parse planner output, requiring an object with a `steps` array.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value.get("steps") {
            Some(serde_json::Value::Array(_)) => Ok(serde_json::from_value(value)?),
            Some(_) => Err(WeaveError::LlmParse(
                "plan field 'steps' is not a list".into(),
            )),
            None => Err(WeaveError::LlmParse(
                "plan JSON is missing the 'steps' list".into(),
            )),
        }
    }
}

/// A validated step. Immutable once built by the plan graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub name: String,
    /// Always a JSON object.
    pub params: serde_json::Value,
    pub depends_on: BTreeSet<String>,
}

/// Outcome of one dispatched step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum StepOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl StepOutcome {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Success(serde_json::Value::String(s.into()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The value substituted for an exact `{id}` placeholder.
    ///
    /// Failures substitute their error text.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Success(v) => v.clone(),
            Self::Failure(msg) => serde_json::Value::String(msg.clone()),
        }
    }

    /// Textual form used for inline substitution and display.
    pub fn render(&self) -> String {
        match self {
            Self::Success(serde_json::Value::String(s)) => s.clone(),
            Self::Success(v) => v.to_string(),
            Self::Failure(msg) => msg.clone(),
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A chat message sent to a completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// One chat-completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Tool description offered to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Property names declared by the input schema.
    pub fn param_names(&self) -> Vec<String> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A record handed to the persistence collaborator.
#[derive(Debug, Clone)]
pub enum AuditRecord {
    /// A conversation message (user input or final answer).
    Message {
        role: Role,
        content: String,
        meta: serde_json::Value,
    },
    /// The outcome of a dispatched step.
    StepOutput {
        step_id: String,
        kind: StepKind,
        name: String,
        outcome: StepOutcome,
        timestamp: DateTime<Utc>,
    },
}

/// Event broadcast while a turn is planned and executed.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A new user turn started.
    TurnStarted { user_input: String },
    /// A planner attempt failed and will be retried.
    PlannerRetry { attempt: u32, error: String },
    /// The planner produced a parseable plan.
    PlanProposed { plan: serde_json::Value },
    /// The plan failed validation; nothing ran.
    PlanRejected { error: String },
    /// A ready set is about to be dispatched.
    ReadySetStarted { index: usize, step_ids: Vec<String> },
    /// A step was handed to its executor.
    StepStarted {
        step_id: String,
        kind: StepKind,
        name: String,
    },
    /// A step produced its outcome.
    StepFinished {
        step_id: String,
        kind: StepKind,
        name: String,
        succeeded: bool,
        elapsed_ms: u64,
    },
    /// Every step committed.
    PlanFinished {
        steps: usize,
        failed: usize,
        elapsed_ms: u64,
    },
    /// The final answer was produced.
    TurnComplete { user_input: String, response: String },
    /// The turn was aborted.
    TurnFailed { error: String },
}

impl EngineEvent {
    /// Short snake_case name used as the `kind` of a log entry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::PlannerRetry { .. } => "planner_error",
            Self::PlanProposed { .. } => "planner_ok",
            Self::PlanRejected { .. } => "plan_rejected",
            Self::ReadySetStarted { .. } => "ready_set_started",
            Self::StepStarted { .. } => "step_started",
            Self::StepFinished { .. } => "step_finished",
            Self::PlanFinished { .. } => "plan_finished",
            Self::TurnComplete { .. } => "session_complete",
            Self::TurnFailed { .. } => "turn_failed",
        }
    }
}
