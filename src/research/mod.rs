//! The research pipeline: decomposition, parallel gathering, iteration
//! control and the coordinator that drives them.

pub mod controller;
pub mod coordinator;
pub mod decomposer;
pub mod limiter;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{Coverage, GapAnalyzer, ResearchPhase, ResearchState};
pub use coordinator::ResearchCoordinator;
pub use decomposer::{PlanContext, TaskDecomposer};
pub use limiter::{CallLimiter, LimitedAgent, LimitedSearch, WorkClock};
pub use worker::{Assignment, WorkerOutcome, WorkerPool};
