//! Query decomposition into independent sub-questions.

use crate::agent::capability::{PlanOutput, PlanRequest};
use crate::agent::{invoke_once, AgentClient, AgentRequest, RetryPolicy};
use crate::error::PlanningError;
use crate::models::{Query, ResearchPlan, SubQuestion};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the planner already knows when refining a plan.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    /// Sub-questions completed in earlier iterations.
    pub answered: Vec<String>,
    /// Gaps reported by the evaluator.
    pub gaps: Vec<String>,
    /// Strongest evidence gathered so far.
    pub evidence_digest: Vec<String>,
}

impl PlanContext {
    pub fn is_initial(&self) -> bool {
        self.answered.is_empty() && self.gaps.is_empty()
    }
}

/// Turns a query (and, on refinement, known gaps) into a [`ResearchPlan`].
pub struct TaskDecomposer {
    agent: Arc<dyn AgentClient>,
    retry: RetryPolicy,
    max_sub_questions: usize,
}

impl TaskDecomposer {
    pub fn new(agent: Arc<dyn AgentClient>, retry: RetryPolicy, max_sub_questions: usize) -> Self {
        Self {
            agent,
            retry,
            max_sub_questions: max_sub_questions.max(1),
        }
    }

    /// Plan with one fallback: any failure is retried once with a strict prompt.
    pub async fn plan(
        &self,
        query: &Query,
        iteration: usize,
        context: &PlanContext,
    ) -> Result<ResearchPlan, PlanningError> {
        match self.decompose(query, iteration, context, false).await {
            Ok(plan) => Ok(plan),
            Err(e) => {
                warn!(
                    phase = "planning",
                    iteration, "Planning failed ({}), retrying with strict prompt", e
                );
                self.decompose(query, iteration, context, true).await
            }
        }
    }

    /// A single planning attempt.
    pub async fn decompose(
        &self,
        query: &Query,
        iteration: usize,
        context: &PlanContext,
        strict: bool,
    ) -> Result<ResearchPlan, PlanningError> {
        let request = AgentRequest::Plan(PlanRequest {
            query: query.to_string(),
            max_sub_questions: self.max_sub_questions,
            answered: context.answered.clone(),
            gaps: context.gaps.clone(),
            evidence_digest: context.evidence_digest.clone(),
        });

        let output = invoke_once(self.agent.as_ref(), &request, strict, self.retry)
            .await?
            .into_plan()?;
        let plan = self.build_plan(output, iteration, &context.answered);

        if plan.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }

        info!(
            phase = "planning",
            iteration,
            "Planned {} sub-question(s) for: {}",
            plan.len(),
            query
        );
        for sq in &plan.sub_questions {
            debug!("  [{}] {}", sq.angle, sq.text);
        }

        Ok(plan)
    }

    /// Trim, deduplicate, drop already answered questions and cap the plan.
    fn build_plan(&self, output: PlanOutput, iteration: usize, answered: &[String]) -> ResearchPlan {
        let mut seen: HashSet<String> = answered.iter().map(|q| normalize_question(q)).collect();
        let mut sub_questions = Vec::new();

        for planned in output.sub_questions {
            let text = planned.question.trim();
            if text.is_empty() || !seen.insert(normalize_question(text)) {
                continue;
            }
            let angle = match planned.angle.trim() {
                "" => "general",
                angle => angle,
            };
            sub_questions.push(SubQuestion::new(text, angle, iteration));
            if sub_questions.len() == self.max_sub_questions {
                break;
            }
        }

        ResearchPlan { sub_questions }
    }
}

/// Lowercase alphanumeric words, single spaced.
fn normalize_question(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Capability;
    use crate::error::AgentError;
    use crate::research::testing::MockAgent;
    use std::time::Duration;

    fn decomposer(agent: Arc<MockAgent>, max: usize) -> TaskDecomposer {
        let retry = RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
        };
        TaskDecomposer::new(agent, retry, max)
    }

    fn query() -> Query {
        Query::parse("effects of remote work on urban housing").unwrap()
    }

    #[test]
    fn test_normalize_question() {
        assert_eq!(
            normalize_question("  How did RENTS change?? "),
            "how did rents change"
        );
    }

    #[tokio::test]
    async fn test_plan_is_deduplicated_and_capped() {
        let agent = Arc::new(MockAgent::new().with_plan(&[
            "How did rents change?",
            "how did rents change",
            "",
            "What happened to office vacancy?",
            "Did people move to suburbs?",
        ]));

        let plan = decomposer(agent, 2)
            .plan(&query(), 1, &PlanContext::default())
            .await
            .unwrap();

        let texts: Vec<&str> = plan.sub_questions.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["How did rents change?", "What happened to office vacancy?"]
        );
        assert!(plan.sub_questions.iter().all(|q| q.iteration == 1));
    }

    #[tokio::test]
    async fn test_refinement_skips_answered_questions() {
        let agent = Arc::new(
            MockAgent::new().with_plan(&["How did rents change?", "Which cities gained residents?"]),
        );
        let context = PlanContext {
            answered: vec!["How did rents change?".to_string()],
            gaps: vec!["city level migration".to_string()],
            evidence_digest: vec![],
        };
        assert!(!context.is_initial());

        let plan = decomposer(agent, 5).plan(&query(), 2, &context).await.unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.sub_questions[0].text, "Which cities gained residents?");
        assert_eq!(plan.sub_questions[0].iteration, 2);
    }

    #[tokio::test]
    async fn test_failure_retried_once_in_strict_mode() {
        let agent = Arc::new(
            MockAgent::new()
                .with_plan_error(AgentError::Unavailable("down".into()))
                .with_plan(&["How did rents change?"]),
        );

        let plan = decomposer(agent.clone(), 3)
            .plan(&query(), 1, &PlanContext::default())
            .await;

        assert!(plan.is_ok());
        assert_eq!(agent.calls(Capability::Planning), 2);
        assert_eq!(agent.strict_calls(Capability::Planning), 1);
    }

    #[tokio::test]
    async fn test_plan_of_answered_questions_is_empty() {
        let agent = Arc::new(
            MockAgent::new()
                .with_plan(&["How did rents change?"])
                .with_plan(&["how did rents change"]),
        );
        let context = PlanContext {
            answered: vec!["How did rents change?".to_string()],
            ..PlanContext::default()
        };

        let err = decomposer(agent, 3)
            .plan(&query(), 2, &context)
            .await
            .unwrap_err();

        assert_eq!(err, PlanningError::EmptyPlan);
    }
}
