use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use weave_core::error::{Result, WeaveError};
use weave_core::traits::Tool;
use weave_core::types::ToolDefinition;

/// Registry of available tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Tool definitions offered to the planner.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Invoke a tool by name with named arguments.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| WeaveError::ToolNotFound(name.to_string()))?;

        let args = validate_args(name, &tool.input_schema(), args)?;
        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = name, args = args.len(), "Invoking tool");

        match tokio::time::timeout(timeout, tool.execute(args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, timeout_secs = tool.timeout_secs(), "Tool timed out");
                Err(WeaveError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs: tool.timeout_secs(),
                })
            }
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(crate::builtin::system::GetIpAddressTool);
        registry.register(crate::builtin::system::GetOsInfoTool);
        registry.register(crate::builtin::system::GetCpuInfoTool);
        registry.register(crate::builtin::system::GetGpuInfoTool);
        registry.register(crate::builtin::system::GetStorageInfoTool);

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `args` against the schema's declared properties.
///
/// Unknown names are rejected unless the schema sets
/// `additionalProperties: true`; names listed in `required` must be present.
fn validate_args(tool: &str, schema: &Value, args: Value) -> Result<Map<String, Value>> {
    let args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(WeaveError::ToolValidation {
                tool: tool.to_string(),
                message: format!("arguments must be an object, got {}", other),
            })
        }
    };

    let properties = schema.get("properties").and_then(|p| p.as_object());
    let open = schema
        .get("additionalProperties")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !open {
        for key in args.keys() {
            if !properties.is_some_and(|p| p.contains_key(key)) {
                return Err(WeaveError::ToolValidation {
                    tool: tool.to_string(),
                    message: format!("unexpected argument '{}'", key),
                });
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !args.contains_key(name) {
                return Err(WeaveError::ToolValidation {
                    tool: tool.to_string(),
                    message: format!("missing required argument '{}'", name),
                });
            }
        }
    }

    Ok(args)
}
