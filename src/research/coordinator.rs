//! End-to-end orchestration of a research run.
//!
//! The coordinator owns the lifecycle:
//! plan, gather in parallel, evaluate, optionally refine and gather again,
//! then synthesize. Errors from individual sub-questions are contained
//! here; only planning failure on the first iteration, a run with nothing
//! completed, or a cancellation before any evidence reach the caller.

use crate::agent::{AgentClient, OllamaAgent, RetryPolicy};
use crate::analysis::{DedupPolicy, EvidenceAggregator, EvidenceSet};
use crate::config::{Config, ResearchConfig};
use crate::error::{ResearchError, Result, SynthesisError};
use crate::models::{Query, Report, ReportMetadata, SubQuestionStatus};
use crate::report::ReportSynthesizer;
use crate::research::controller::{
    Coverage, GapAnalyzer, ResearchPhase, ResearchState, DIGEST_LIMIT,
};
use crate::research::decomposer::{PlanContext, TaskDecomposer};
use crate::research::limiter::{CallLimiter, LimitedAgent};
use crate::research::worker::{Assignment, WorkerPool};
use crate::search::{SearchTool, SearxSearch};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs research queries end to end.
pub struct ResearchCoordinator {
    config: ResearchConfig,
    model_name: String,
    decomposer: TaskDecomposer,
    workers: WorkerPool,
    analyzer: GapAnalyzer,
    synthesizer: ReportSynthesizer,
    cancel: CancellationToken,
}

impl ResearchCoordinator {
    /// Wire a coordinator around the given clients. All of their calls share
    /// one in-flight limit of `config.max_in_flight_calls`.
    pub fn new(
        config: ResearchConfig,
        retry: RetryPolicy,
        agent: Arc<dyn AgentClient>,
        search: Arc<dyn SearchTool>,
    ) -> Self {
        let limiter = CallLimiter::new(config.max_in_flight_calls);
        let model_name = agent.model_name().to_string();
        let limited: Arc<dyn AgentClient> =
            Arc::new(LimitedAgent::new(agent.clone(), limiter.clone()));

        Self {
            decomposer: TaskDecomposer::new(limited.clone(), retry, config.max_sub_questions),
            // Workers apply the limiter per unit, so queueing is kept off
            // their timeout.
            workers: WorkerPool::new(
                agent,
                search,
                limiter,
                retry,
                config.concurrency,
                config.worker_timeout(),
                config.top_k,
            ),
            analyzer: GapAnalyzer::new(limited.clone(), retry),
            synthesizer: ReportSynthesizer::new(limited, retry),
            model_name,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Coordinator backed by Ollama and SearxNG as configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config
            .research
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid research configuration: {}", e))?;

        let agent = Arc::new(OllamaAgent::new(&config.model)?);
        let search = Arc::new(SearxSearch::new(&config.search)?);

        Ok(Self::new(
            config.research.clone(),
            RetryPolicy::from(&config.model),
            agent,
            search,
        ))
    }

    /// Token that stops the current and any future run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Research `query` and produce a report.
    ///
    /// Always terminates: iterations are bounded, every unit of work has a
    /// timeout and cancellation stops gathering. A cancelled run still
    /// returns a report over whatever evidence was already merged.
    pub async fn research(&self, query: &str) -> Result<Report> {
        let query = Query::parse(query)?;
        let started = Instant::now();

        let run = self.cancel.child_token();
        let _deadline = self
            .config
            .run_timeout()
            .map(|limit| Deadline::arm(run.clone(), limit));

        let aggregator = EvidenceAggregator::new(DedupPolicy::from(&self.config));
        let mut state = ResearchState::new();

        info!(phase = "planning", "Researching: {}", query);
        let initial_context = PlanContext::default();
        let initial = self.decomposer.plan(&query, 1, &initial_context);
        let plan = match until_cancelled(&run, initial).await {
            None => {
                state.advance(ResearchPhase::Failed)?;
                return Err(ResearchError::Cancelled);
            }
            Some(Err(e)) => {
                error!(phase = "planning", "Planning failed: {}", e);
                state.advance(ResearchPhase::Failed)?;
                return Err(e.into());
            }
            Some(Ok(plan)) => plan,
        };
        state.push_plan(plan);
        state.advance(ResearchPhase::Gathering)?;

        loop {
            state.iteration += 1;
            self.gather(&query, &mut state, &aggregator, &run).await;

            if run.is_cancelled() {
                warn!(
                    phase = "gathering",
                    iteration = state.iteration,
                    "Run cancelled, synthesizing from gathered evidence"
                );
                break;
            }

            state.advance(ResearchPhase::Evaluating)?;
            if state.iteration >= self.config.max_iterations {
                info!(
                    phase = "evaluating",
                    "Reached iteration limit ({})", self.config.max_iterations
                );
                break;
            }

            let evidence = aggregator.snapshot().await;
            let evaluation = self.analyzer.evaluate(&query, &state, &evidence);
            let gaps = match until_cancelled(&run, evaluation).await {
                Some(Coverage::Insufficient { gaps }) => gaps,
                Some(Coverage::Sufficient) | None => break,
            };

            let context = PlanContext {
                answered: state.answered_questions(),
                gaps,
                evidence_digest: evidence.digest(DIGEST_LIMIT),
            };
            let next = state.iteration + 1;
            match until_cancelled(&run, self.decomposer.plan(&query, next, &context)).await {
                Some(Ok(plan)) => {
                    state.push_plan(plan);
                    state.advance(ResearchPhase::Gathering)?;
                }
                Some(Err(e)) => {
                    warn!(
                        phase = "planning",
                        iteration = next,
                        "Refinement failed ({}), synthesizing what was gathered",
                        e
                    );
                    break;
                }
                None => break,
            }
        }

        state.advance(ResearchPhase::Synthesizing)?;
        state.close_open_sub_questions();
        let cancelled = run.is_cancelled();
        let evidence = aggregator.snapshot().await;

        if evidence.is_empty() {
            if cancelled {
                state.advance(ResearchPhase::Failed)?;
                return Err(ResearchError::Cancelled);
            }
            if !state.any_completed() {
                state.advance(ResearchPhase::Failed)?;
                return Err(ResearchError::ResearchFailed(format!(
                    "all {} sub-question(s) failed",
                    state.sub_question_count()
                )));
            }
        }

        let metadata = self.metadata(&query, &state, &evidence, started.elapsed());
        let mut report = match self
            .synthesizer
            .synthesize(&query, &evidence, &state.topic_order(), metadata.clone(), !cancelled)
            .await
        {
            Ok(report) => report,
            Err(SynthesisError::EmptyEvidence) => {
                warn!(phase = "synthesizing", "No usable evidence, report is inconclusive");
                Report::inconclusive(
                    &query,
                    "No usable evidence was found for any sub-question.",
                    metadata,
                )
            }
        };

        for (question, reason) in state.failures() {
            report
                .notes
                .push(format!("Sub-question \"{}\" was not answered: {}.", question, reason));
        }
        if cancelled {
            report.notes.push(
                "Research was cancelled; the report covers evidence gathered until then."
                    .to_string(),
            );
        }

        state.advance(ResearchPhase::Done)?;
        info!(
            phase = "done",
            "Research finished in {:.1}s: {} finding(s), {} citation(s)",
            report.metadata.duration_seconds,
            report.metadata.findings,
            report.citation_count()
        );

        Ok(report)
    }

    /// Dispatch every pending sub-question of the current plan and record
    /// the outcomes. Returns once all units have finished.
    async fn gather(
        &self,
        query: &Query,
        state: &mut ResearchState,
        aggregator: &EvidenceAggregator,
        run: &CancellationToken,
    ) {
        let Some(plan) = state.current_plan_mut() else {
            return;
        };

        let assignments: Vec<Assignment> = plan
            .sub_questions
            .iter_mut()
            .enumerate()
            .filter(|(_, sq)| sq.status == SubQuestionStatus::Pending)
            .map(|(index, sq)| {
                sq.status = SubQuestionStatus::InProgress;
                Assignment {
                    index,
                    question: sq.text.clone(),
                }
            })
            .collect();

        let outcomes = self.workers.run(query, assignments, aggregator, run).await;

        for outcome in outcomes {
            let Some(sq) = plan.sub_questions.get_mut(outcome.index) else {
                continue;
            };
            match outcome.result {
                Ok(ids) => {
                    sq.status = SubQuestionStatus::Done;
                    sq.finding_ids = ids;
                }
                Err(e) => sq.status = SubQuestionStatus::Failed((&e).into()),
            }
        }
    }

    fn metadata(
        &self,
        query: &Query,
        state: &ResearchState,
        evidence: &EvidenceSet,
        elapsed: Duration,
    ) -> ReportMetadata {
        ReportMetadata {
            model_used: self.model_name.clone(),
            iterations: state.iteration,
            sub_questions_total: state.sub_question_count(),
            sub_questions_failed: state.failed_count(),
            findings: evidence.len(),
            clusters: evidence.clusters().len(),
            conflicts: evidence.conflict_count(),
            duration_seconds: elapsed.as_secs_f64(),
            ..ReportMetadata::new(query)
        }
    }
}

/// Cancels a run token once the run timeout elapses.
struct Deadline(JoinHandle<()>);

impl Deadline {
    fn arm(token: CancellationToken, limit: Duration) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Run timeout of {:?} reached, cancelling", limit);
            token.cancel();
        }))
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// `None` if `token` fires before `future` completes.
async fn until_cancelled<F: Future>(token: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = future => Some(output),
    }
}
