//! In-memory agent and search doubles for pipeline tests.

use crate::agent::capability::{
    EvaluationOutput, ExtractedClaim, ExtractionOutput, PlanOutput, PlannedQuestion,
    SynthesisOutput, SynthesizedSection,
};
use crate::agent::{AgentClient, AgentOutput, AgentRequest, Capability};
use crate::error::{AgentError, SearchError};
use crate::models::Source;
use crate::search::SearchTool;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Extractions whose source content starts with this marker fail.
pub const FAILING_CONTENT: &str = "!unreadable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisMode {
    /// Summarize every section and cite exactly what was offered.
    Echo,
    /// Like `Echo`, plus a citation that does not exist.
    BogusCitation,
    Fail,
}

/// Scripted agent: plans come from a queue, extraction echoes the source
/// content as a single claim, evaluation and synthesis follow fixed modes.
pub struct MockAgent {
    plans: Mutex<VecDeque<Result<PlanOutput, AgentError>>>,
    insufficient: bool,
    evaluation_fails: bool,
    synthesis: SynthesisMode,
    calls: Mutex<Vec<(Capability, bool)>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            insufficient: false,
            evaluation_fails: false,
            synthesis: SynthesisMode::Echo,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_plan(self, questions: &[&str]) -> Self {
        let plan = PlanOutput {
            sub_questions: questions
                .iter()
                .map(|q| PlannedQuestion {
                    question: q.to_string(),
                    angle: "general".to_string(),
                })
                .collect(),
        };
        self.plans.lock().unwrap().push_back(Ok(plan));
        self
    }

    pub fn with_plan_error(self, error: AgentError) -> Self {
        self.plans.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn always_insufficient(mut self) -> Self {
        self.insufficient = true;
        self
    }

    pub fn failing_evaluation(mut self) -> Self {
        self.evaluation_fails = true;
        self
    }

    pub fn synthesis(mut self, mode: SynthesisMode) -> Self {
        self.synthesis = mode;
        self
    }

    /// Number of invocations for one capability.
    pub fn calls(&self, capability: Capability) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == capability)
            .count()
    }

    pub fn strict_calls(&self, capability: Capability) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, strict)| *c == capability && *strict)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn invoke(&self, request: &AgentRequest, strict: bool) -> Result<AgentOutput, AgentError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.capability(), strict));

        match request {
            AgentRequest::Plan(_) => self
                .plans
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::Unavailable("no plan scripted".into())))
                .map(AgentOutput::Plan),
            AgentRequest::Extract(req) => {
                if req.source_content.starts_with(FAILING_CONTENT) {
                    return Err(AgentError::Unavailable("extraction failed".into()));
                }
                let findings = if req.source_content.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![ExtractedClaim {
                        claim: req.source_content.clone(),
                        confidence: 0.8,
                    }]
                };
                Ok(AgentOutput::Extraction(ExtractionOutput { findings }))
            }
            AgentRequest::Evaluate(req) => {
                if self.evaluation_fails {
                    return Err(AgentError::Unavailable("evaluator down".into()));
                }
                let gaps = if self.insufficient {
                    vec![format!("open gap after iteration {}", req.iteration)]
                } else {
                    Vec::new()
                };
                Ok(AgentOutput::Evaluation(EvaluationOutput {
                    sufficient: !self.insufficient,
                    gaps,
                }))
            }
            AgentRequest::Synthesize(req) => {
                if self.synthesis == SynthesisMode::Fail {
                    return Err(AgentError::Unavailable("synthesizer down".into()));
                }
                let sections = req
                    .sections
                    .iter()
                    .map(|draft| {
                        let mut citations: Vec<String> =
                            draft.claims.iter().map(|c| c.citation.clone()).collect();
                        if self.synthesis == SynthesisMode::BogusCitation {
                            citations.push("F-000000000000".to_string());
                        }
                        SynthesizedSection {
                            heading: draft.heading.clone(),
                            summary: format!("Summary of {}", draft.heading),
                            citations,
                        }
                    })
                    .collect();
                Ok(AgentOutput::Synthesis(SynthesisOutput {
                    title: format!("Findings on {}", req.query),
                    sections,
                }))
            }
        }
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

enum Response {
    Sources(Vec<Source>),
    Fail(SearchError),
    Hang,
}

/// Search double keyed by the exact query text. Unknown queries have no results.
pub struct MockSearch {
    responses: HashMap<String, Response>,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every search takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Register `(url, content)` pairs for `question`.
    pub fn with_sources(mut self, question: &str, sources: &[(&str, &str)]) -> Self {
        let sources = sources
            .iter()
            .map(|(url, content)| Source::new(*url, format!("Page at {}", url), *content))
            .collect();
        self.responses
            .insert(question.to_string(), Response::Sources(sources));
        self
    }

    pub fn failing(mut self, question: &str, error: SearchError) -> Self {
        self.responses
            .insert(question.to_string(), Response::Fail(error));
        self
    }

    /// Never answers `question` in any reasonable time.
    pub fn hanging(mut self, question: &str) -> Self {
        self.responses.insert(question.to_string(), Response::Hang);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchTool for MockSearch {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.responses.get(query) {
            Some(Response::Sources(sources)) => Ok(sources.iter().take(top_k).cloned().collect()),
            Some(Response::Fail(error)) => Err(error.clone()),
            Some(Response::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SearchError::Timeout(3600))
            }
            None => Err(SearchError::NoResults(query.to_string())),
        }
    }
}
