//! Capability contracts between the pipeline and language-model agents.
//!
//! Every capability has a typed request and a typed output. Outputs travel in
//! the tagged [`AgentOutput`] enum so a response for the wrong capability, or
//! one that fails validation, is rejected as [`AgentError::MalformedOutput`]
//! instead of being trusted.

use crate::error::AgentError;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an agent is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Planning,
    Extraction,
    Evaluation,
    Synthesis,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Planning => write!(f, "planning"),
            Capability::Extraction => write!(f, "extraction"),
            Capability::Evaluation => write!(f, "evaluation"),
            Capability::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Input for the planning capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRequest {
    pub query: String,
    pub max_sub_questions: usize,
    /// Questions already researched in earlier iterations.
    pub answered: Vec<String>,
    /// Coverage gaps reported by the evaluator.
    pub gaps: Vec<String>,
    /// Short digest of the evidence gathered so far.
    pub evidence_digest: Vec<String>,
}

/// Input for the extraction capability: one source for one sub-question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub query: String,
    pub sub_question: String,
    pub source_url: String,
    pub source_title: String,
    pub source_content: String,
}

/// Input for the evaluation capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRequest {
    pub query: String,
    pub iteration: usize,
    pub sub_questions: Vec<String>,
    pub evidence_digest: Vec<String>,
}

/// A claim handed to the synthesis agent, addressed by its citation key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimDigest {
    pub citation: String,
    pub claim: String,
}

/// One draft section handed to the synthesis agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionDraft {
    pub heading: String,
    pub claims: Vec<ClaimDigest>,
}

/// Input for the synthesis capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub query: String,
    pub sections: Vec<SectionDraft>,
    pub disagreements: Vec<String>,
}

/// A request for one capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum AgentRequest {
    Plan(PlanRequest),
    Extract(ExtractionRequest),
    Evaluate(EvaluationRequest),
    Synthesize(SynthesisRequest),
}

impl AgentRequest {
    pub fn capability(&self) -> Capability {
        match self {
            AgentRequest::Plan(_) => Capability::Planning,
            AgentRequest::Extract(_) => Capability::Extraction,
            AgentRequest::Evaluate(_) => Capability::Evaluation,
            AgentRequest::Synthesize(_) => Capability::Synthesis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannedQuestion {
    /// The sub-question to research.
    pub question: String,
    /// The angle it covers, e.g. "economic" or "policy".
    #[serde(default)]
    pub angle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanOutput {
    pub sub_questions: Vec<PlannedQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedClaim {
    /// A single factual claim supported by the source.
    pub claim: String,
    /// Confidence that the source supports the claim, 0.0 to 1.0.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionOutput {
    #[serde(default)]
    pub findings: Vec<ExtractedClaim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationOutput {
    /// Whether the evidence covers the query well enough to write a report.
    pub sufficient: bool,
    /// Topics still missing, phrased as research directions.
    #[serde(default)]
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SynthesizedSection {
    pub heading: String,
    pub summary: String,
    /// Citation keys (e.g. "F-1a2b3c4d5e6f") backing the summary.
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SynthesisOutput {
    pub title: String,
    #[serde(default)]
    pub sections: Vec<SynthesizedSection>,
}

/// A validated agent response, tagged by capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum AgentOutput {
    Plan(PlanOutput),
    Extraction(ExtractionOutput),
    Evaluation(EvaluationOutput),
    Synthesis(SynthesisOutput),
}

impl AgentOutput {
    pub fn capability(&self) -> Capability {
        match self {
            AgentOutput::Plan(_) => Capability::Planning,
            AgentOutput::Extraction(_) => Capability::Extraction,
            AgentOutput::Evaluation(_) => Capability::Evaluation,
            AgentOutput::Synthesis(_) => Capability::Synthesis,
        }
    }

    /// Reject outputs for another capability or with missing required content.
    pub fn validate_for(self, expected: Capability) -> Result<Self, AgentError> {
        if self.capability() != expected {
            return Err(AgentError::MalformedOutput(format!(
                "expected {} output, got {}",
                expected,
                self.capability()
            )));
        }

        match &self {
            AgentOutput::Plan(plan) => {
                if plan.sub_questions.iter().all(|q| q.question.trim().is_empty()) {
                    return Err(AgentError::MalformedOutput(
                        "plan contains no sub-questions".to_string(),
                    ));
                }
            }
            AgentOutput::Synthesis(synthesis) => {
                if synthesis.title.trim().is_empty() {
                    return Err(AgentError::MalformedOutput(
                        "synthesis title is empty".to_string(),
                    ));
                }
            }
            AgentOutput::Extraction(_) | AgentOutput::Evaluation(_) => {}
        }

        Ok(self)
    }

    pub fn into_plan(self) -> Result<PlanOutput, AgentError> {
        match self.validate_for(Capability::Planning)? {
            AgentOutput::Plan(plan) => Ok(plan),
            other => Err(mismatch(Capability::Planning, &other)),
        }
    }

    pub fn into_extraction(self) -> Result<ExtractionOutput, AgentError> {
        match self.validate_for(Capability::Extraction)? {
            AgentOutput::Extraction(out) => Ok(out),
            other => Err(mismatch(Capability::Extraction, &other)),
        }
    }

    pub fn into_evaluation(self) -> Result<EvaluationOutput, AgentError> {
        match self.validate_for(Capability::Evaluation)? {
            AgentOutput::Evaluation(out) => Ok(out),
            other => Err(mismatch(Capability::Evaluation, &other)),
        }
    }

    pub fn into_synthesis(self) -> Result<SynthesisOutput, AgentError> {
        match self.validate_for(Capability::Synthesis)? {
            AgentOutput::Synthesis(out) => Ok(out),
            other => Err(mismatch(Capability::Synthesis, &other)),
        }
    }
}

fn mismatch(expected: Capability, got: &AgentOutput) -> AgentError {
    AgentError::MalformedOutput(format!(
        "expected {} output, got {}",
        expected,
        got.capability()
    ))
}

/// Uniform interface to a language-model-backed capability.
///
/// `strict` asks the implementation to constrain the model harder (for
/// example by attaching the output JSON schema); it is set on the single
/// retry after a [`AgentError::MalformedOutput`].
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn invoke(&self, request: &AgentRequest, strict: bool) -> Result<AgentOutput, AgentError>;

    /// Name of the underlying model, for report metadata.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
