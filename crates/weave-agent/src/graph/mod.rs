//! Plan graph validation, scheduling, and execution.
//!
//! A plan is validated into a [`PlanGraph`], then driven ready set by ready
//! set: every step whose dependencies are committed runs concurrently, and
//! their outcomes are committed together before the next set is computed.

pub mod dispatch;
pub mod executor;
pub mod plan;
pub mod resolver;
pub mod results;
pub mod scheduler;

pub use dispatch::StepDispatcher;
pub use executor::{ExecutionReport, PlanExecutor, StepReport};
pub use plan::PlanGraph;
pub use results::ResultStore;
pub use scheduler::Scheduler;
