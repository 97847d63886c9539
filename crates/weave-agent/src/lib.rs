pub mod graph;
pub mod history;
pub mod orchestrator;
pub mod planner;
pub mod responder;
pub mod run_log;

pub use graph::{
    ExecutionReport, PlanExecutor, PlanGraph, ResultStore, Scheduler, StepDispatcher, StepReport,
};
pub use history::{ConversationHistory, Turn};
pub use orchestrator::{OrchestratorBuilder, TurnOrchestrator, TurnOutcome};
pub use planner::Planner;
pub use responder::Responder;
pub use run_log::RunLogger;
