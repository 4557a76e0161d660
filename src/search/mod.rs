//! External information retrieval.
//!
//! The pipeline only depends on the [`SearchTool`] trait; [`SearxSearch`] is
//! the production implementation.

mod searx;

pub use searx::SearxSearch;

use crate::error::SearchError;
use crate::models::Source;
use async_trait::async_trait;

/// Retrieves a ranked list of sources for a query.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Return at most `top_k` sources, best first.
    ///
    /// An empty result is reported as [`SearchError::NoResults`].
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>, SearchError>;
}
