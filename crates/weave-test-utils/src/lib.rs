//! Shared test doubles for the Weave collaborator traits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weave_core::error::{Result, WeaveError};
use weave_core::traits::{AuditSink, LlmClient, Tool};
use weave_core::types::{AuditRecord, CompletionRequest};

// ── ScriptedLlm ─────────────────────────────────────────────────

enum Reply {
    Text(String),
    Error(String),
}

/// An `LlmClient` that replays queued replies and records every request.
///
/// When the queue is empty the default reply is returned, or an
/// `LlmRequest` error if none is set.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    default_reply: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `text` whenever the queue is empty.
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_reply = Some(text.into());
        self
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.replies.lock().unwrap().push_back(Reply::Text(text.into()));
        self
    }

    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Error(message.into()));
        self
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, request: CompletionRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Error(msg)) => Err(WeaveError::LlmRequest(msg)),
                None => self
                    .default_reply
                    .clone()
                    .ok_or_else(|| WeaveError::LlmRequest("no scripted reply".into())),
            }
        })
    }
}

// ── FnTool ──────────────────────────────────────────────────────

type ToolFn = dyn Fn(Map<String, Value>) -> Result<Value> + Send + Sync;

/// A `Tool` backed by a closure, with an optional artificial delay.
pub struct FnTool {
    name: String,
    schema: Value,
    delay: Option<Duration>,
    f: Arc<ToolFn>,
}

impl FnTool {
    /// A tool accepting any arguments.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            schema: serde_json::json!({ "type": "object", "additionalProperties": true }),
            delay: None,
            f: Arc::new(f),
        }
    }

    /// A tool that always returns `value`.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, move |_| Ok(value.clone()))
    }

    /// A tool that always fails with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let tool = name.clone();
        Self::new(name, move |_| {
            Err(WeaveError::ToolExecution {
                tool: tool.clone(),
                message: message.clone(),
            })
        })
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool."
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn execute(&self, args: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.f)(args)
        })
    }
}

// ── Audit sinks ─────────────────────────────────────────────────

/// Collects audit records in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.records.lock().unwrap().push(record);
            Ok(())
        })
    }
}

/// An audit sink whose every write fails.
pub struct FailingSink;

impl AuditSink for FailingSink {
    fn record(&self, _record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(WeaveError::Database("disk full".into())) })
    }
}
