//! Parallel research of sub-questions.
//!
//! Each unit of work searches for one sub-question, extracts findings from
//! every retrieved source and hands the complete batch to the
//! [`EvidenceAggregator`]. Units run concurrently up to the configured limit
//! and are bounded by a per-unit timeout. The timeout is measured on a
//! [`WorkClock`], so time a unit spends queued on the shared call limiter
//! does not count against it. A failing unit only fails its own sub-question.

use crate::agent::capability::ExtractionRequest;
use crate::agent::{invoke_with_retry, AgentClient, AgentRequest, RetryPolicy};
use crate::analysis::EvidenceAggregator;
use crate::error::{AgentError, SearchError, WorkerError};
use crate::models::{FailureReason, Finding, FindingId, Query, Source};
use crate::research::limiter::{CallLimiter, LimitedAgent, LimitedSearch, WorkClock};
use crate::search::SearchTool;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One sub-question handed to the pool, identified by its index in the plan.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub index: usize,
    pub question: String,
}

/// Result of one unit of work.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub index: usize,
    pub result: Result<Vec<FindingId>, WorkerError>,
}

impl From<&WorkerError> for FailureReason {
    fn from(error: &WorkerError) -> Self {
        match error {
            WorkerError::Search(e) => FailureReason::Search(e.to_string()),
            WorkerError::Agent(e) => FailureReason::Agent(e.to_string()),
            WorkerError::Timeout(_) => FailureReason::Timeout,
            WorkerError::Cancelled => FailureReason::Cancelled,
        }
    }
}

/// Runs assignments concurrently against the search tool and the agent.
/// Every call goes through `limiter`.
pub struct WorkerPool {
    agent: Arc<dyn AgentClient>,
    search: Arc<dyn SearchTool>,
    limiter: CallLimiter,
    retry: RetryPolicy,
    concurrency: usize,
    timeout: Duration,
    top_k: usize,
}

impl WorkerPool {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        search: Arc<dyn SearchTool>,
        limiter: CallLimiter,
        retry: RetryPolicy,
        concurrency: usize,
        timeout: Duration,
        top_k: usize,
    ) -> Self {
        Self {
            agent,
            search,
            limiter,
            retry,
            concurrency: concurrency.max(1),
            timeout,
            top_k: top_k.max(1),
        }
    }

    /// Research every assignment and return one outcome per assignment,
    /// ordered by plan index. Returns only after all units have finished.
    pub async fn run(
        &self,
        query: &Query,
        assignments: Vec<Assignment>,
        aggregator: &EvidenceAggregator,
        cancel: &CancellationToken,
    ) -> Vec<WorkerOutcome> {
        info!(
            phase = "gathering",
            "Researching {} sub-question(s), {} at a time",
            assignments.len(),
            self.concurrency
        );

        let mut outcomes: Vec<WorkerOutcome> = stream::iter(assignments)
            .map(|assignment| self.run_one(query, assignment, aggregator, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.index);
        outcomes
    }

    async fn run_one(
        &self,
        query: &Query,
        assignment: Assignment,
        aggregator: &EvidenceAggregator,
        cancel: &CancellationToken,
    ) -> WorkerOutcome {
        let question = assignment.question.as_str();

        let clock = WorkClock::start();
        let clients = UnitClients {
            agent: LimitedAgent::new(self.agent.clone(), self.limiter.clone())
                .with_clock(clock.clone()),
            search: LimitedSearch::new(self.search.clone(), self.limiter.clone())
                .with_clock(clock.clone()),
        };

        let result = if cancel.is_cancelled() {
            Err(WorkerError::Cancelled)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Err(WorkerError::Cancelled),
                res = within_budget(
                    self.timeout,
                    &clock,
                    self.research(&clients, query, question),
                ) => {
                    match res {
                        Some(inner) => inner,
                        None => Err(WorkerError::Timeout(self.timeout)),
                    }
                }
            }
        };

        let result = match result {
            Ok((findings, sources)) => {
                let ids: Vec<FindingId> = findings.iter().map(|f| f.id.clone()).collect();
                let added = aggregator.merge(findings, sources).await;
                info!(
                    phase = "gathering",
                    sub_question = question,
                    "Collected {} finding(s), {} new",
                    ids.len(),
                    added
                );
                Ok(ids)
            }
            Err(e) => {
                warn!(
                    phase = "gathering",
                    sub_question = question,
                    "Sub-question failed: {}",
                    e
                );
                Err(e)
            }
        };

        WorkerOutcome {
            index: assignment.index,
            result,
        }
    }

    /// Search, then extract from every source concurrently.
    async fn research(
        &self,
        clients: &UnitClients,
        query: &Query,
        question: &str,
    ) -> Result<(Vec<Finding>, Vec<Source>), WorkerError> {
        let sources = match clients.search.search(question, self.top_k).await {
            Ok(sources) => sources,
            Err(SearchError::NoResults(_)) => {
                info!(
                    phase = "gathering",
                    sub_question = question,
                    "No search results"
                );
                return Ok((Vec::new(), Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Retrieved {} source(s) for: {}", sources.len(), question);

        let extractions =
            futures::future::join_all(
                sources
                    .iter()
                    .map(|s| self.extract(&clients.agent, query, question, s)),
            )
            .await;

        let mut findings = Vec::new();
        let mut extracted = 0;
        let mut last_error: Option<AgentError> = None;

        for (source, extraction) in sources.iter().zip(extractions) {
            match extraction {
                Ok(claims) => {
                    extracted += 1;
                    findings.extend(claims.into_iter().map(|(claim, confidence)| {
                        Finding::new(claim, source.id.as_str(), question, confidence)
                    }));
                }
                Err(e) => {
                    warn!(
                        phase = "gathering",
                        sub_question = question,
                        "Extraction from {} failed: {}",
                        source.id,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        if extracted == 0 {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }

        Ok((findings, sources))
    }

    async fn extract(
        &self,
        agent: &LimitedAgent,
        query: &Query,
        question: &str,
        source: &Source,
    ) -> Result<Vec<(String, f32)>, AgentError> {
        let request = AgentRequest::Extract(ExtractionRequest {
            query: query.to_string(),
            sub_question: question.to_string(),
            source_url: source.id.clone(),
            source_title: source.title.clone(),
            source_content: source.content.clone(),
        });

        let output = invoke_with_retry(agent, &request, self.retry)
            .await?
            .into_extraction()?;

        Ok(output
            .findings
            .into_iter()
            .filter(|c| !c.claim.trim().is_empty())
            .map(|c| (c.claim, c.confidence))
            .collect())
    }
}

/// The clients of one unit, sharing its clock.
struct UnitClients {
    agent: LimitedAgent,
    search: LimitedSearch,
}

/// Drive `work` until it completes or `clock` has recorded `budget` of work.
/// `None` when the budget ran out first.
async fn within_budget<F: Future>(
    budget: Duration,
    clock: &WorkClock,
    work: F,
) -> Option<F::Output> {
    tokio::pin!(work);
    loop {
        let remaining = budget.saturating_sub(clock.elapsed());
        if remaining.is_zero() {
            return None;
        }
        tokio::select! {
            output = &mut work => return Some(output),
            _ = tokio::time::sleep(remaining) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DedupPolicy;
    use crate::research::testing::{MockAgent, MockSearch, FAILING_CONTENT};

    fn pool(search: MockSearch, timeout: Duration) -> WorkerPool {
        limited_pool(search, timeout, 8)
    }

    fn limited_pool(search: MockSearch, timeout: Duration, in_flight: usize) -> WorkerPool {
        WorkerPool::new(
            Arc::new(MockAgent::new()),
            Arc::new(search),
            CallLimiter::new(in_flight),
            RetryPolicy {
                max_retries: 0,
                initial_backoff: Duration::from_millis(1),
            },
            2,
            timeout,
            3,
        )
    }

    fn assignments(questions: &[&str]) -> Vec<Assignment> {
        questions
            .iter()
            .enumerate()
            .map(|(index, q)| Assignment {
                index,
                question: q.to_string(),
            })
            .collect()
    }

    fn query() -> Query {
        Query::parse("remote work and housing").unwrap()
    }

    #[tokio::test]
    async fn test_successful_unit_merges_its_batch() {
        let search = MockSearch::new().with_sources(
            "rents",
            &[
                ("https://a.example", "Suburban rents increased sharply"),
                ("https://b.example", "Downtown office vacancy reached record levels"),
            ],
        );
        let aggregator = EvidenceAggregator::new(DedupPolicy::default());

        let outcomes = pool(search, Duration::from_secs(5))
            .run(&query(), assignments(&["rents"]), &aggregator, &CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 2);
        assert_eq!(aggregator.len().await, 2);
        assert_eq!(aggregator.snapshot().await.sources().count(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let search = MockSearch::new()
            .with_sources("good", &[("https://a.example", "Commute times dropped")])
            .failing("broken", SearchError::Unavailable("503".into()))
            .with_sources("unreadable", &[("https://c.example", FAILING_CONTENT)]);
        let aggregator = EvidenceAggregator::new(DedupPolicy::default());

        let outcomes = pool(search, Duration::from_secs(5))
            .run(
                &query(),
                assignments(&["good", "broken", "unreadable", "unknown"]),
                &aggregator,
                &CancellationToken::new(),
            )
            .await;

        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(WorkerError::Search(_))));
        assert!(matches!(outcomes[2].result, Err(WorkerError::Agent(_))));
        // No results is a completed sub-question with nothing to show
        assert_eq!(outcomes[3].result.as_ref().unwrap().len(), 0);
        assert_eq!(aggregator.len().await, 1);
    }

    #[tokio::test]
    async fn test_timeout_discards_partial_work() {
        let search = MockSearch::new()
            .hanging("slow")
            .with_sources("fast", &[("https://a.example", "Home offices became common")]);
        let aggregator = EvidenceAggregator::new(DedupPolicy::default());

        let outcomes = pool(search, Duration::from_millis(200))
            .run(&query(), assignments(&["slow", "fast"]), &aggregator, &CancellationToken::new())
            .await;

        assert_eq!(
            outcomes[0].result,
            Err(WorkerError::Timeout(Duration::from_millis(200)))
        );
        assert!(outcomes[1].result.is_ok());
        assert_eq!(aggregator.len().await, 1);
    }

    #[tokio::test]
    async fn test_queueing_on_limiter_does_not_use_up_timeout() {
        // Each unit needs ~600ms of work but waits ~600ms for the single
        // permit while its sibling searches
        let search = MockSearch::new()
            .with_latency(Duration::from_millis(600))
            .with_sources("rents", &[("https://a.example", "Suburban rents increased")])
            .with_sources("offices", &[("https://b.example", "Office vacancy hit records")]);
        let aggregator = EvidenceAggregator::new(DedupPolicy::default());

        let outcomes = limited_pool(search, Duration::from_secs(1), 1)
            .run(
                &query(),
                assignments(&["rents", "offices"]),
                &aggregator,
                &CancellationToken::new(),
            )
            .await;

        assert!(outcomes[0].result.is_ok(), "{:?}", outcomes[0].result);
        assert!(outcomes[1].result.is_ok(), "{:?}", outcomes[1].result);
        assert_eq!(aggregator.len().await, 2);
    }

    #[tokio::test]
    async fn test_budget_counts_work_not_queueing() {
        let clock = WorkClock::start();
        let work = tokio::time::sleep(Duration::from_millis(50));
        assert!(within_budget(Duration::from_secs(1), &clock, work).await.is_some());

        let clock = WorkClock::start();
        let work = tokio::time::sleep(Duration::from_secs(5));
        assert!(within_budget(Duration::from_millis(50), &clock, work).await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_pool_merges_nothing() {
        let search = MockSearch::new().with_sources("rents", &[("https://a.example", "Rents rose")]);
        let aggregator = EvidenceAggregator::new(DedupPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = pool(search, Duration::from_secs(5))
            .run(&query(), assignments(&["rents"]), &aggregator, &cancel)
            .await;

        assert_eq!(outcomes[0].result, Err(WorkerError::Cancelled));
        assert!(aggregator.is_empty().await);
    }

    #[test]
    fn test_failure_reason_from_worker_error() {
        let reason = FailureReason::from(&WorkerError::Timeout(Duration::from_secs(30)));
        assert_eq!(reason, FailureReason::Timeout);

        let reason = FailureReason::from(&WorkerError::Search(SearchError::Timeout(5)));
        assert!(matches!(reason, FailureReason::Search(_)));
    }
}
