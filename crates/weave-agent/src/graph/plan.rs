use std::collections::{BTreeSet, HashMap, VecDeque};

use serde_json::Value;
use tracing::{debug, warn};

use weave_core::error::{Result, WeaveError};
use weave_core::types::{RawPlan, RawStep, Step, StepKind, INITIAL_REQUEST_KEY};

use super::resolver;

/// A validated, acyclic plan.
///
/// Steps keep the order the planner emitted them in; that order breaks ties
/// wherever several steps become ready at once.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
}

impl PlanGraph {
    /// Validate a raw plan and build the graph.
    ///
    /// Fails with `PlanValidation` on structural problems and `PlanCycle`
    /// when the dependencies cannot be drained.
    pub fn build(plan: &RawPlan) -> Result<Self> {
        let mut steps = Vec::with_capacity(plan.steps.len());
        let mut index = HashMap::new();

        for (position, raw) in plan.steps.iter().enumerate() {
            let step = validate_step(position, raw)?;
            if index.contains_key(&step.id) {
                return Err(WeaveError::PlanValidation(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            index.insert(step.id.clone(), position);
            steps.push(step);
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for step in &steps {
            for dep in &step.depends_on {
                if !index.contains_key(dep) {
                    return Err(WeaveError::PlanValidation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.id.clone());
            }
        }

        let graph = Self {
            steps,
            index,
            dependents,
        };
        graph.check_acyclic()?;
        graph.warn_undeclared_references();

        debug!(steps = graph.len(), "Plan graph built");
        Ok(graph)
    }

    /// Parse planner JSON and build the graph.
    pub fn from_json(text: &str) -> Result<Self> {
        Self::build(&RawPlan::from_json(text)?)
    }

    /// Steps in plan order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    /// Position of a step in plan order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Steps that list `id` in their dependencies, in plan order.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of unresolved dependencies of each step before anything runs.
    pub fn in_degrees(&self) -> HashMap<&str, usize> {
        self.steps
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Kahn's algorithm. Steps left undrained are reported in plan order.
    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree = self.in_degrees();
        let mut queue: VecDeque<&str> = self
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id.as_str())
            .collect();

        let mut drained = 0;
        while let Some(id) = queue.pop_front() {
            drained += 1;
            for dependent in self.dependents(id) {
                if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if drained == self.steps.len() {
            return Ok(());
        }

        let stuck: Vec<String> = self
            .steps
            .iter()
            .filter(|s| in_degree.get(s.id.as_str()).is_some_and(|&d| d > 0))
            .map(|s| s.id.clone())
            .collect();
        Err(WeaveError::PlanCycle(stuck))
    }

    /// A placeholder naming a step outside `depends_on` may resolve to
    /// nothing, or to a value that happens to be committed already.
    fn warn_undeclared_references(&self) {
        for step in &self.steps {
            for id in resolver::referenced_ids(&step.params) {
                if id != INITIAL_REQUEST_KEY
                    && self.index.contains_key(&id)
                    && !step.depends_on.contains(&id)
                {
                    warn!(
                        step_id = %step.id,
                        referenced = %id,
                        "Placeholder references a step not listed in depends_on"
                    );
                }
            }
        }
    }
}

fn validate_step(position: usize, raw: &RawStep) -> Result<Step> {
    let id = match raw.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            return Err(WeaveError::PlanValidation(format!(
                "step #{} is missing 'id'",
                position + 1
            )))
        }
    };
    if id == INITIAL_REQUEST_KEY {
        return Err(WeaveError::PlanValidation(format!(
            "step id '{}' is reserved",
            INITIAL_REQUEST_KEY
        )));
    }

    let kind = match raw.kind.as_deref() {
        None => {
            return Err(WeaveError::PlanValidation(format!(
                "step '{}' is missing 'type'",
                id
            )))
        }
        Some(t) => StepKind::parse(t).ok_or_else(|| {
            WeaveError::PlanValidation(format!(
                "step '{}' has unknown type '{}' (expected \"agent\" or \"tool\")",
                id, t
            ))
        })?,
    };

    let name = match raw.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(WeaveError::PlanValidation(format!(
                "step '{}' is missing 'name'",
                id
            )))
        }
    };

    let params = match &raw.params {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(_) => {
            return Err(WeaveError::PlanValidation(format!(
                "step '{}' has non-object 'params'",
                id
            )))
        }
    };

    let depends_on: BTreeSet<String> = raw
        .depends_on
        .iter()
        .flatten()
        .map(|d| d.trim().to_string())
        .collect();

    Ok(Step {
        id,
        kind,
        name,
        params,
        depends_on,
    })
}
