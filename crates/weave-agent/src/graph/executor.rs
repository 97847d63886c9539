use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use weave_core::error::{Result, WeaveError};
use weave_core::event::EventBus;
use weave_core::types::{EngineEvent, Step, StepKind, StepOutcome};

use super::dispatch::StepDispatcher;
use super::plan::PlanGraph;
use super::resolver;
use super::results::ResultStore;
use super::scheduler::Scheduler;

/// Result of executing a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step_id: String,
    pub kind: StepKind,
    pub name: String,
    pub succeeded: bool,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// Result of executing an entire plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Every committed outcome, plus the seeded request.
    pub results: ResultStore,
    /// The ready sets in the order they ran.
    pub ready_sets: Vec<Vec<String>>,
    /// Per-step reports in commit order.
    pub steps: Vec<StepReport>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

impl ExecutionReport {
    /// True when no step produced a failure outcome.
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.succeeded)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| !s.succeeded)
    }
}

/// Drives a [`PlanGraph`] to completion one ready set at a time.
///
/// Steps in a ready set run concurrently, bounded by `max_concurrency`.
/// Their outcomes are held privately until the whole set has finished and
/// are then committed together, so no step ever sees a sibling's result.
pub struct PlanExecutor {
    dispatcher: Arc<StepDispatcher>,
    max_concurrency: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl PlanExecutor {
    pub fn new(dispatcher: Arc<StepDispatcher>, max_concurrency: usize) -> Self {
        Self {
            dispatcher,
            max_concurrency: max_concurrency.max(1),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Execute every step of `graph`.
    ///
    /// Step failures are recorded as outcomes and never abort the plan.
    /// Cancellation is observed before each ready set and while one is in
    /// flight; a cancelled set's results are discarded.
    pub async fn execute(
        &self,
        graph: &PlanGraph,
        user_request: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let start = Instant::now();
        let mut results = ResultStore::new(user_request);
        let mut scheduler = Scheduler::new(graph);
        let mut ready_sets = Vec::new();
        let mut reports = Vec::with_capacity(graph.len());

        loop {
            if cancel.is_cancelled() {
                warn!(committed = results.len(), "Plan execution cancelled");
                return Err(WeaveError::Cancelled);
            }

            let ready = scheduler.next_ready_set();
            if ready.is_empty() {
                break;
            }

            let index = ready_sets.len();
            info!(index, steps = ?ready, "Running ready set");
            self.publish(EngineEvent::ReadySetStarted {
                index,
                step_ids: ready.clone(),
            });

            // Resolve against the store as it stood at the barrier.
            let jobs: Vec<(&Step, Value)> = ready
                .iter()
                .filter_map(|id| graph.get(id))
                .map(|step| (step, resolver::resolve(&step.params, &results)))
                .collect();

            let run = futures::stream::iter(jobs)
                .map(|(step, params)| self.run_step(step, params))
                .buffer_unordered(self.max_concurrency)
                .collect::<Vec<_>>();

            let mut finished = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(index, "Plan execution cancelled mid-set, discarding its results");
                    return Err(WeaveError::Cancelled);
                }
                finished = run => finished,
            };

            // Completion order is arbitrary; report in plan order.
            finished.sort_by_key(|(report, _)| graph.position(&report.step_id));

            let batch = finished
                .iter()
                .map(|(report, outcome)| (report.step_id.clone(), outcome.clone()))
                .collect();
            results.commit_batch(batch)?;
            scheduler.commit(&ready);

            reports.extend(finished.into_iter().map(|(report, _)| report));
            ready_sets.push(ready);
        }

        if !scheduler.is_done() {
            return Err(WeaveError::PlanCycle(scheduler.pending()));
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        let failed = reports.iter().filter(|r| !r.succeeded).count();
        info!(
            steps = reports.len(),
            failed,
            ready_sets = ready_sets.len(),
            elapsed_ms = total_elapsed_ms,
            "Plan execution complete"
        );
        self.publish(EngineEvent::PlanFinished {
            steps: reports.len(),
            failed,
            elapsed_ms: total_elapsed_ms,
        });

        Ok(ExecutionReport {
            results,
            ready_sets,
            steps: reports,
            total_elapsed_ms,
        })
    }

    async fn run_step(&self, step: &Step, params: Value) -> (StepReport, StepOutcome) {
        let start = Instant::now();
        debug!(step_id = %step.id, kind = step.kind.as_str(), name = %step.name, "Executing step");
        self.publish(EngineEvent::StepStarted {
            step_id: step.id.clone(),
            kind: step.kind,
            name: step.name.clone(),
        });

        let outcome = self.dispatcher.dispatch(step, params).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let succeeded = outcome.is_success();
        if succeeded {
            debug!(step_id = %step.id, elapsed_ms, "Step succeeded");
        } else {
            warn!(step_id = %step.id, elapsed_ms, error = %outcome.render(), "Step failed");
        }
        self.publish(EngineEvent::StepFinished {
            step_id: step.id.clone(),
            kind: step.kind,
            name: step.name.clone(),
            succeeded,
            elapsed_ms,
        });

        (
            StepReport {
                step_id: step.id.clone(),
                kind: step.kind,
                name: step.name.clone(),
                succeeded,
                elapsed_ms,
            },
            outcome,
        )
    }
}
