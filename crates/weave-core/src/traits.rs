use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// LLM client: chat completion against a configured provider.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and return the assistant's reply text.
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>>;
}

/// Tool: a named function invoked with explicit arguments.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in plan steps).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input. Declared properties are the accepted
    /// argument names.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated named arguments.
    fn execute(
        &self,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Audit sink: fire-and-forget persistence of messages and step outputs.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>>;
}

/// Sink that drops every record.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
