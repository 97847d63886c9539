use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weave_core::catalog::AgentCatalog;
use weave_core::config::AppConfig;
use weave_core::error::{Result, WeaveError};
use weave_core::event::EventBus;
use weave_core::traits::{AuditSink, LlmClient};
use weave_core::types::{AuditRecord, EngineEvent, RawPlan, Role};
use weave_tools::ToolRegistry;

use crate::graph::{ExecutionReport, PlanExecutor, PlanGraph, StepDispatcher};
use crate::history::{ConversationHistory, Turn};
use crate::planner::Planner;
use crate::responder::Responder;

/// Shared infrastructure for building a [`TurnOrchestrator`].
pub struct OrchestratorBuilder {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmClient>,
    pub catalog: Arc<AgentCatalog>,
    pub tools: Arc<ToolRegistry>,
    pub audit: Arc<dyn AuditSink>,
    pub event_bus: Arc<EventBus>,
}

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub plan: RawPlan,
    pub report: ExecutionReport,
}

/// Runs one user turn end to end: plan, validate, execute, respond.
///
/// Keeps the conversation history so later turns give the planner context.
pub struct TurnOrchestrator {
    planner: Planner,
    executor: PlanExecutor,
    responder: Responder,
    catalog: Arc<AgentCatalog>,
    tools: Arc<ToolRegistry>,
    audit: Arc<dyn AuditSink>,
    event_bus: Arc<EventBus>,
    history: ConversationHistory,
}

impl TurnOrchestrator {
    pub fn new(builder: OrchestratorBuilder) -> Self {
        let OrchestratorBuilder {
            config,
            llm,
            catalog,
            tools,
            audit,
            event_bus,
        } = builder;

        let planner = Planner::new(llm.clone(), config.planner.clone())
            .with_event_bus(event_bus.clone());
        let dispatcher = StepDispatcher::new(
            catalog.clone(),
            llm.clone(),
            tools.clone(),
            audit.clone(),
            config.planner.model.clone(),
        );
        let executor = PlanExecutor::new(Arc::new(dispatcher), config.engine.max_concurrency)
            .with_event_bus(event_bus.clone());
        let responder = Responder::new(llm, config.responder());

        Self {
            planner,
            executor,
            responder,
            catalog,
            tools,
            audit,
            event_bus,
            history: ConversationHistory::new(config.history.max_window),
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one turn. Planner exhaustion, plan rejection and cancellation
    /// abort the turn; individual step failures do not.
    pub async fn run_turn(
        &mut self,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.event_bus.publish(EngineEvent::TurnStarted {
            user_input: user_input.to_string(),
        });
        self.record(AuditRecord::Message {
            role: Role::User,
            content: user_input.to_string(),
            meta: json!({ "source": "cli" }),
        })
        .await;

        match self.plan_and_execute(user_input, cancel).await {
            Ok(outcome) => {
                info!(
                    steps = outcome.report.steps.len(),
                    elapsed_ms = outcome.report.total_elapsed_ms,
                    "Turn complete"
                );
                self.event_bus.publish(EngineEvent::TurnComplete {
                    user_input: user_input.to_string(),
                    response: outcome.response.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Turn failed");
                self.event_bus.publish(EngineEvent::TurnFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn plan_and_execute(
        &mut self,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let context = self.history.build_planner_context(user_input);
        let definitions = self.tools.definitions();

        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WeaveError::Cancelled),
            plan = self.planner.plan(&context, &self.catalog, &definitions) => plan?,
        };

        let graph = match PlanGraph::build(&plan) {
            Ok(graph) => graph,
            Err(e) => {
                warn!(error = %e, "Plan rejected, nothing was run");
                self.event_bus.publish(EngineEvent::PlanRejected {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let report = self.executor.execute(&graph, user_input, cancel).await?;

        let response = self
            .responder
            .respond(user_input, &plan, &report.results)
            .await;
        self.record(AuditRecord::Message {
            role: Role::Assistant,
            content: response.clone(),
            meta: json!({ "plan": &plan }),
        })
        .await;

        self.history.push(Turn::new(
            user_input,
            response.clone(),
            plan.clone(),
            &report.results,
        ));

        Ok(TurnOutcome {
            response,
            plan,
            report,
        })
    }

    async fn record(&self, record: AuditRecord) {
        if let Err(e) = self.audit.record(record).await {
            warn!(error = %e, "Failed to persist message");
        }
    }
}
