//! Retry policy for agent invocations.
//!
//! - `RateLimited`: exponential backoff, up to `max_retries` attempts
//! - `MalformedOutput`: one retry in strict mode, then give up
//! - `Unavailable`: no retry

use crate::agent::capability::{AgentClient, AgentOutput, AgentRequest};
use crate::config::ModelConfig;
use crate::error::AgentError;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently to retry an agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl From<&ModelConfig> for RetryPolicy {
    fn from(config: &ModelConfig) -> Self {
        Self {
            max_retries: config.retries,
            initial_backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Invoke `client` once in the given mode, validating the output against the
/// request's capability. Rate limiting is retried with exponential backoff;
/// every other error is returned as is.
pub async fn invoke_once(
    client: &dyn AgentClient,
    request: &AgentRequest,
    strict: bool,
    policy: RetryPolicy,
) -> Result<AgentOutput, AgentError> {
    let capability = request.capability();
    let mut rate_limit_retries = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        let result = client
            .invoke(request, strict)
            .await
            .and_then(|output| output.validate_for(capability));

        match result {
            Err(AgentError::RateLimited(msg)) if rate_limit_retries < policy.max_retries => {
                rate_limit_retries += 1;
                warn!(
                    "{} call rate limited ({}), retry {}/{} in {:?}",
                    capability, msg, rate_limit_retries, policy.max_retries, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                debug!("{} call failed: {}", capability, e);
                return Err(e);
            }
            Ok(output) => return Ok(output),
        }
    }
}

/// Invoke `client` and retry according to `policy`: a malformed answer gets
/// exactly one more attempt in strict mode.
pub async fn invoke_with_retry(
    client: &dyn AgentClient,
    request: &AgentRequest,
    policy: RetryPolicy,
) -> Result<AgentOutput, AgentError> {
    match invoke_once(client, request, false, policy).await {
        Err(AgentError::MalformedOutput(msg)) => {
            warn!(
                "{} output malformed ({}), retrying in strict mode",
                request.capability(),
                msg
            );
            invoke_once(client, request, true, policy).await
        }
        other => other,
    }
}
