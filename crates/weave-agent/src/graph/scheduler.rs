use std::collections::{HashMap, HashSet};

use super::plan::PlanGraph;

/// Computes ready sets over a [`PlanGraph`].
///
/// A step is ready once every dependency has been committed. Callers take a
/// ready set with [`next_ready_set`](Self::next_ready_set), run it, then
/// report it back with [`commit`](Self::commit) before asking again.
pub struct Scheduler<'g> {
    graph: &'g PlanGraph,
    remaining: HashMap<&'g str, usize>,
    emitted: HashSet<&'g str>,
    committed: HashSet<&'g str>,
}

impl<'g> Scheduler<'g> {
    pub fn new(graph: &'g PlanGraph) -> Self {
        Self {
            graph,
            remaining: graph.in_degrees(),
            emitted: HashSet::new(),
            committed: HashSet::new(),
        }
    }

    /// Steps whose dependencies are all committed and that have not been
    /// handed out yet, in plan order. Empty when nothing is ready.
    pub fn next_ready_set(&mut self) -> Vec<String> {
        let graph = self.graph;
        let ready: Vec<&'g str> = graph
            .steps()
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !self.emitted.contains(id) && self.remaining.get(id) == Some(&0))
            .collect();
        self.emitted.extend(ready.iter().copied());
        ready.into_iter().map(str::to_string).collect()
    }

    /// Record a ready set as committed, releasing its dependents.
    pub fn commit(&mut self, ids: &[String]) {
        let graph = self.graph;
        for step in ids.iter().filter_map(|id| graph.get(id)) {
            if !self.committed.insert(step.id.as_str()) {
                continue;
            }
            for dependent in graph.dependents(&step.id) {
                if let Some(count) = self.remaining.get_mut(dependent.as_str()) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    /// True once every step has been committed.
    pub fn is_done(&self) -> bool {
        self.committed.len() == self.graph.len()
    }

    /// Steps not yet committed, in plan order.
    pub fn pending(&self) -> Vec<String> {
        self.graph
            .steps()
            .iter()
            .filter(|s| !self.committed.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect()
    }
}
