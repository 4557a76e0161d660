//! Error taxonomy for the research pipeline.
//!
//! Lower-level errors (agent, search, worker, synthesis) are contained by the
//! coordinator. Only [`ResearchError`] ever reaches the caller of
//! [`crate::research::ResearchCoordinator::research`].

use std::time::Duration;
use thiserror::Error;

/// Failure of a single Agent Client invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// The provider throttled the request. Retryable with backoff.
    #[error("agent rate limited: {0}")]
    RateLimited(String),

    /// The model answered but the payload did not match the expected schema.
    #[error("malformed agent output: {0}")]
    MalformedOutput(String),

    /// The provider could not be reached or returned a fatal error.
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    /// Whether the error is worth retrying with backoff.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AgentError::RateLimited(_))
    }
}

/// Failure of a Search Tool call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    /// The search succeeded but returned nothing. Not fatal.
    #[error("no results for query: {0}")]
    NoResults(String),

    #[error("search timed out after {0}s")]
    Timeout(u64),

    #[error("search unavailable: {0}")]
    Unavailable(String),
}

/// Why a sub-question's worker did not complete. Localized to one sub-question.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("search failed: {0}")]
    Search(#[from] SearchError),

    #[error("extraction failed: {0}")]
    Agent(#[from] AgentError),

    /// The unit's work budget, excluding time queued for call permits, ran out.
    #[error("worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker cancelled")]
    Cancelled,
}

/// Failure to produce a research plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("planning agent failed: {0}")]
    Agent(#[from] AgentError),

    #[error("planning produced no usable sub-questions")]
    EmptyPlan,
}

/// Failure to synthesize a report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// There is nothing to ground a report on.
    #[error("evidence set is empty")]
    EmptyEvidence,
}

/// Top-level error returned by the research coordinator.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("research planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("research failed: {0}")]
    ResearchFailed(String),

    #[error("research cancelled before any evidence was gathered")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ResearchError>;
