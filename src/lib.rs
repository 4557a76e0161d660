//! deepresearch - multi-agent research pipeline
//!
//! A research query is decomposed into sub-questions, researched in
//! parallel against a web search backend, evaluated for gaps over a bounded
//! number of iterations and synthesized into a report in which every claim
//! cites the findings and sources it came from.

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod report;
pub mod research;
pub mod search;

pub use error::{ResearchError, Result};
pub use models::{Query, Report};
pub use research::ResearchCoordinator;
