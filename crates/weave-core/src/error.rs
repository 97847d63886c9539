use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeaveError {
    // Plan errors
    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Plan contains a dependency cycle involving: {}", .0.join(", "))]
    PlanCycle(Vec<String>),

    #[error("Planner failed after {attempts} attempts: {message}")]
    PlannerExhausted { attempts: u32, message: String },

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Agent errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {tool}: {message}")]
    ToolValidation { tool: String, message: String },

    #[error("Execution cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeaveError {
    /// True for the structural rejections raised before any step runs.
    pub fn is_plan_rejection(&self) -> bool {
        matches!(self, Self::PlanValidation(_) | Self::PlanCycle(_))
    }
}

pub type Result<T> = std::result::Result<T, WeaveError>;
