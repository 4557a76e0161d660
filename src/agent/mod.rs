//! Language-model agent clients.
//!
//! This module provides the capability contracts, the retry policy and the
//! Ollama-backed implementation.

pub mod capability;
pub mod ollama;
pub mod retry;

pub use capability::{AgentClient, AgentOutput, AgentRequest, Capability};
pub use ollama::OllamaAgent;
pub use retry::{invoke_once, invoke_with_retry, RetryPolicy};
