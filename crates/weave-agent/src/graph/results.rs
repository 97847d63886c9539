use std::collections::BTreeMap;

use serde_json::Value;

use weave_core::error::{Result, WeaveError};
use weave_core::types::{StepOutcome, INITIAL_REQUEST_KEY};

/// Write-once store of step outcomes for one plan execution.
///
/// Seeded with the user's request under `initial_request`. Outcomes only
/// enter through [`commit_batch`](Self::commit_batch), which either writes a
/// whole ready set or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    entries: BTreeMap<String, StepOutcome>,
}

impl ResultStore {
    /// A store seeded with the user's request.
    pub fn new(initial_request: impl Into<String>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            INITIAL_REQUEST_KEY.to_string(),
            StepOutcome::text(initial_request),
        );
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&StepOutcome> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn initial_request(&self) -> Option<&str> {
        match self.entries.get(INITIAL_REQUEST_KEY) {
            Some(StepOutcome::Success(Value::String(s))) => Some(s),
            _ => None,
        }
    }

    /// Commit the outcomes of one ready set.
    ///
    /// Rejects the whole batch if any id is reserved, already stored, or
    /// repeated within the batch.
    pub fn commit_batch(&mut self, batch: Vec<(String, StepOutcome)>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (id, _) in &batch {
            if id == INITIAL_REQUEST_KEY {
                return Err(WeaveError::PlanValidation(format!(
                    "result key '{}' is reserved",
                    id
                )));
            }
            if self.entries.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(WeaveError::PlanValidation(format!(
                    "result for step '{}' was already committed",
                    id
                )));
            }
        }
        self.entries.extend(batch);
        Ok(())
    }

    /// Step outcomes, excluding the seeded request.
    pub fn step_results(&self) -> impl Iterator<Item = (&str, &StepOutcome)> {
        self.entries
            .iter()
            .filter(|(id, _)| id.as_str() != INITIAL_REQUEST_KEY)
            .map(|(id, outcome)| (id.as_str(), outcome))
    }

    /// Number of committed step outcomes.
    pub fn len(&self) -> usize {
        self.step_results().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries as a JSON object; failures appear as their error text.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(id, outcome)| (id.clone(), outcome.to_value()))
                .collect(),
        )
    }
}
