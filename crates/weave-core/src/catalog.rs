use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, WeaveError};

/// Catalog entry reserved for the planner's own prompt.
pub const ORCHESTRATOR_AGENT: &str = "orchestrator_agent";

/// Configuration of one LLM-backed agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    /// Agent name referenced by plan steps. Defaults to the file stem.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Model identifier; the engine's default model is used when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    /// Parameter names the planner should supply.
    #[serde(default)]
    pub expected_params: Vec<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_expected_params(mut self, params: Vec<String>) -> Self {
        self.expected_params = params;
        self
    }
}

/// Registry of agents by name, populated once at startup.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    agents: BTreeMap<String, AgentSpec>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = AgentSpec>) -> Self {
        let mut catalog = Self::new();
        for spec in specs {
            catalog.register(spec);
        }
        catalog
    }

    /// Load every `*.json` file in `dir`. A missing directory yields an empty catalog.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Agent directory not found, catalog empty");
            return Ok(catalog);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let mut spec: AgentSpec = serde_json::from_str(&content).map_err(|e| {
                WeaveError::Config(format!("invalid agent file {}: {}", path.display(), e))
            })?;
            if spec.name.is_empty() {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    spec.name = stem.to_string();
                }
            }
            if catalog.agents.contains_key(&spec.name) {
                warn!(agent = %spec.name, path = %path.display(), "Duplicate agent name, later file wins");
            }
            catalog.register(spec);
        }

        debug!(dir = %dir.display(), count = catalog.len(), "Agent catalog loaded");
        Ok(catalog)
    }

    /// Register an agent, replacing any entry with the same name.
    pub fn register(&mut self, spec: AgentSpec) {
        self.agents.insert(spec.name.clone(), spec);
    }

    /// Merge `other` into this catalog; entries in `other` win.
    pub fn merge(&mut self, other: AgentCatalog) {
        self.agents.extend(other.agents);
    }

    pub fn get(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.get(name)
    }

    /// Look up an agent, failing with a typed error.
    pub fn require(&self, name: &str) -> Result<&AgentSpec> {
        self.get(name)
            .ok_or_else(|| WeaveError::AgentNotFound(name.to_string()))
    }

    /// The planner's own entry, if configured.
    pub fn orchestrator(&self) -> Option<&AgentSpec> {
        self.get(ORCHESTRATOR_AGENT)
    }

    /// Agents the planner may schedule (the orchestrator entry excluded).
    pub fn callable(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents
            .values()
            .filter(|a| a.name != ORCHESTRATOR_AGENT)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
