//! Research lifecycle: phases, run state and the sufficiency check that
//! decides between another gathering round and synthesis.

use crate::agent::capability::EvaluationRequest;
use crate::agent::{invoke_with_retry, AgentClient, AgentRequest, RetryPolicy};
use crate::analysis::EvidenceSet;
use crate::error::ResearchError;
use crate::models::{FailureReason, Query, ResearchPlan, SubQuestionStatus};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of evidence lines shown to the agent when evaluating or planning.
pub const DIGEST_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchPhase {
    Planning,
    Gathering,
    Evaluating,
    Synthesizing,
    Done,
    Failed,
}

impl ResearchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResearchPhase::Done | ResearchPhase::Failed)
    }

    /// Legal edges of the lifecycle. Any live phase may fail.
    pub fn can_transition_to(self, next: ResearchPhase) -> bool {
        use ResearchPhase::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Planning, Gathering)
                | (Gathering, Evaluating)
                // cancelled mid-gathering
                | (Gathering, Synthesizing)
                | (Evaluating, Gathering)
                | (Evaluating, Synthesizing)
                | (Synthesizing, Done)
        )
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::Gathering => "gathering",
            ResearchPhase::Evaluating => "evaluating",
            ResearchPhase::Synthesizing => "synthesizing",
            ResearchPhase::Done => "done",
            ResearchPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything the coordinator tracks about a single run.
#[derive(Debug)]
pub struct ResearchState {
    phase: ResearchPhase,
    /// Completed gathering rounds.
    pub iteration: usize,
    /// One plan per gathering round, oldest first.
    pub plans: Vec<ResearchPlan>,
}

impl Default for ResearchState {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchState {
    pub fn new() -> Self {
        Self {
            phase: ResearchPhase::Planning,
            iteration: 0,
            plans: Vec::new(),
        }
    }

    pub fn phase(&self) -> ResearchPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Move to `next`, rejecting edges the lifecycle does not have.
    pub fn advance(&mut self, next: ResearchPhase) -> Result<(), ResearchError> {
        if !self.phase.can_transition_to(next) {
            return Err(ResearchError::ResearchFailed(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    pub fn push_plan(&mut self, plan: ResearchPlan) {
        self.plans.push(plan);
    }

    pub fn current_plan_mut(&mut self) -> Option<&mut ResearchPlan> {
        self.plans.last_mut()
    }

    /// Every sub-question text in plan order, for grouping report sections.
    pub fn topic_order(&self) -> Vec<String> {
        self.plans
            .iter()
            .flat_map(|p| p.sub_questions.iter())
            .map(|sq| sq.text.clone())
            .collect()
    }

    /// Sub-questions that completed, across all iterations.
    pub fn answered_questions(&self) -> Vec<String> {
        self.plans
            .iter()
            .flat_map(|p| p.sub_questions.iter())
            .filter(|sq| sq.status == SubQuestionStatus::Done)
            .map(|sq| sq.text.clone())
            .collect()
    }

    pub fn any_completed(&self) -> bool {
        self.plans
            .iter()
            .flat_map(|p| p.sub_questions.iter())
            .any(|sq| sq.status == SubQuestionStatus::Done)
    }

    pub fn sub_question_count(&self) -> usize {
        self.plans.iter().map(ResearchPlan::len).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.plans.iter().map(ResearchPlan::failed_count).sum()
    }

    /// `(question, reason)` for every failed sub-question.
    pub fn failures(&self) -> Vec<(String, FailureReason)> {
        self.plans
            .iter()
            .flat_map(|p| p.sub_questions.iter())
            .filter_map(|sq| match &sq.status {
                SubQuestionStatus::Failed(reason) => Some((sq.text.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Mark anything still pending or in progress as cancelled so that no
    /// sub-question reaches synthesis in a non-terminal state.
    pub fn close_open_sub_questions(&mut self) -> usize {
        let mut closed = 0;
        for sq in self.plans.iter_mut().flat_map(|p| p.sub_questions.iter_mut()) {
            if !sq.status.is_terminal() {
                sq.status = SubQuestionStatus::Failed(FailureReason::Cancelled);
                closed += 1;
            }
        }
        closed
    }
}

/// Verdict of the sufficiency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Sufficient,
    Insufficient { gaps: Vec<String> },
}

/// Asks the agent whether the gathered evidence answers the query.
pub struct GapAnalyzer {
    agent: Arc<dyn AgentClient>,
    retry: RetryPolicy,
}

impl GapAnalyzer {
    pub fn new(agent: Arc<dyn AgentClient>, retry: RetryPolicy) -> Self {
        Self { agent, retry }
    }

    /// A failed evaluation counts as sufficient: the run proceeds to
    /// synthesis with what it has.
    pub async fn evaluate(
        &self,
        query: &Query,
        state: &ResearchState,
        evidence: &EvidenceSet,
    ) -> Coverage {
        let request = AgentRequest::Evaluate(EvaluationRequest {
            query: query.to_string(),
            iteration: state.iteration,
            sub_questions: state.topic_order(),
            evidence_digest: evidence.digest(DIGEST_LIMIT),
        });

        let output = match invoke_with_retry(self.agent.as_ref(), &request, self.retry).await {
            Ok(output) => output.into_evaluation(),
            Err(e) => Err(e),
        };

        match output {
            Ok(eval) if eval.sufficient => {
                info!(
                    phase = "evaluating",
                    iteration = state.iteration,
                    "Evidence judged sufficient"
                );
                Coverage::Sufficient
            }
            Ok(eval) => {
                let gaps: Vec<String> = eval
                    .gaps
                    .into_iter()
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect();
                info!(
                    phase = "evaluating",
                    iteration = state.iteration,
                    "Evidence insufficient, {} gap(s) reported",
                    gaps.len()
                );
                Coverage::Insufficient { gaps }
            }
            Err(e) => {
                warn!(
                    phase = "evaluating",
                    iteration = state.iteration,
                    "Evaluation failed ({}), proceeding to synthesis",
                    e
                );
                Coverage::Sufficient
            }
        }
    }
}
