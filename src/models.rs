//! Data models for the research pipeline.
//!
//! This module contains the core data structures shared by every stage:
//! the validated query, plans and sub-questions, retrieved sources,
//! extracted findings and the final report.

use crate::error::ResearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// A validated, immutable research query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query(String);

impl Query {
    /// Validate raw user input. Whitespace-only input is rejected.
    pub fn parse(raw: &str) -> Result<Self, ResearchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResearchError::InvalidQuery(
                "query must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a sub-question ended in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Search(String),
    Agent(String),
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Search(detail) => write!(f, "search error: {}", detail),
            FailureReason::Agent(detail) => write!(f, "agent error: {}", detail),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle of a sub-question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SubQuestionStatus {
    Pending,
    InProgress,
    Done,
    Failed(FailureReason),
}

impl SubQuestionStatus {
    /// Done and failed are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubQuestionStatus::Done | SubQuestionStatus::Failed(_))
    }
}

/// One decomposed angle on the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    /// The question to research.
    pub text: String,
    /// Which angle of the query this covers (economic, policy, ...).
    pub angle: String,
    /// Iteration (1-based) that produced this sub-question.
    pub iteration: usize,
    /// Current status.
    pub status: SubQuestionStatus,
    /// Findings extracted while answering it.
    pub finding_ids: Vec<FindingId>,
}

impl SubQuestion {
    pub fn new(text: impl Into<String>, angle: impl Into<String>, iteration: usize) -> Self {
        Self {
            text: text.into(),
            angle: angle.into(),
            iteration,
            status: SubQuestionStatus::Pending,
            finding_ids: Vec::new(),
        }
    }
}

/// Ordered set of sub-questions for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub sub_questions: Vec<SubQuestion>,
}

impl ResearchPlan {
    pub fn len(&self) -> usize {
        self.sub_questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_questions.is_empty()
    }

    /// True once every sub-question reached done or failed.
    pub fn all_terminal(&self) -> bool {
        self.sub_questions.iter().all(|sq| sq.status.is_terminal())
    }

    pub fn failed_count(&self) -> usize {
        self.sub_questions
            .iter()
            .filter(|sq| matches!(sq.status, SubQuestionStatus::Failed(_)))
            .count()
    }
}

/// Identifier of a source: its URL or another stable locator.
pub type SourceId = String;

/// A retrieved document or page. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// URL or other identifier.
    pub id: SourceId,
    /// Page or document title.
    pub title: String,
    /// Snippet or extracted content used for claim extraction.
    pub content: String,
    /// When the source was retrieved.
    pub retrieved_at: DateTime<Utc>,
}

impl Source {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            retrieved_at: Utc::now(),
        }
    }

    /// Pick between two retrievals of the same source without depending on
    /// arrival order: the earliest retrieval wins, ties broken by content.
    pub fn earliest(self, other: Source) -> Source {
        let key = |s: &Source| (s.retrieved_at, s.title.clone(), s.content.clone());
        if key(&other) < key(&self) {
            other
        } else {
            self
        }
    }
}

/// Content-derived identifier of a finding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(String);

impl FindingId {
    fn derive(sub_question: &str, source_id: &str, claim: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sub_question.as_bytes());
        hasher.update([0u8]);
        hasher.update(source_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(claim.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("F-{}", &digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FindingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A claim extracted from one source for one sub-question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    /// The extracted claim.
    pub claim: String,
    /// Source the claim was read from. The finding does not own the source.
    pub source_id: SourceId,
    /// Sub-question this finding answers.
    pub sub_question: String,
    /// Relevance/confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Finding {
    pub fn new(
        claim: impl Into<String>,
        source_id: impl Into<String>,
        sub_question: impl Into<String>,
        confidence: f32,
    ) -> Self {
        let claim = claim.into().trim().to_string();
        let source_id = source_id.into();
        let sub_question = sub_question.into();
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            id: FindingId::derive(&sub_question, &source_id, &claim),
            claim,
            source_id,
            sub_question,
            confidence,
        }
    }
}

/// Overall outcome of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Grounded in at least one finding.
    Complete,
    /// No evidence could be gathered; the report explains why.
    Inconclusive,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Complete => write!(f, "Complete"),
            ReportStatus::Inconclusive => write!(f, "Inconclusive"),
        }
    }
}

/// One claim in a report with its citations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedClaim {
    pub text: String,
    /// Findings supporting the claim.
    pub finding_ids: Vec<FindingId>,
    /// Sources those findings were read from.
    pub source_ids: Vec<SourceId>,
    pub confidence: f32,
}

/// A titled section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    /// Narrative summary of the section.
    pub summary: String,
    pub claims: Vec<CitedClaim>,
}

/// Contradictory claims kept side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub topic: String,
    pub positions: Vec<CitedClaim>,
}

/// Statistics about the run that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub query: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub iterations: usize,
    pub sub_questions_total: usize,
    pub sub_questions_failed: usize,
    pub findings: usize,
    pub clusters: usize,
    pub conflicts: usize,
    pub duration_seconds: f64,
}

impl ReportMetadata {
    pub fn new(query: &Query) -> Self {
        Self {
            query: query.to_string(),
            generated_at: Utc::now(),
            model_used: String::new(),
            iterations: 0,
            sub_questions_total: 0,
            sub_questions_failed: 0,
            findings: 0,
            clusters: 0,
            conflicts: 0,
            duration_seconds: 0.0,
        }
    }
}

/// The final research report. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub status: ReportStatus,
    pub sections: Vec<ReportSection>,
    pub disagreements: Vec<Disagreement>,
    /// Every source cited anywhere in the report.
    pub sources: Vec<Source>,
    /// Caveats: failed sub-questions, dropped citations, cancellation.
    pub notes: Vec<String>,
    pub metadata: ReportMetadata,
}

impl Report {
    /// A report that admits there is no grounding instead of inventing one.
    pub fn inconclusive(query: &Query, note: impl Into<String>, metadata: ReportMetadata) -> Self {
        Self {
            title: format!("Inconclusive: {}", query),
            status: ReportStatus::Inconclusive,
            sections: Vec::new(),
            disagreements: Vec::new(),
            sources: Vec::new(),
            notes: vec![note.into()],
            metadata,
        }
    }

    pub fn is_inconclusive(&self) -> bool {
        self.status == ReportStatus::Inconclusive
    }

    /// All finding ids cited by sections and disagreements.
    pub fn cited_finding_ids(&self) -> BTreeSet<FindingId> {
        self.sections
            .iter()
            .flat_map(|s| s.claims.iter())
            .chain(self.disagreements.iter().flat_map(|d| d.positions.iter()))
            .flat_map(|c| c.finding_ids.iter().cloned())
            .collect()
    }

    /// Number of claims carrying at least one citation.
    pub fn citation_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.claims.iter())
            .filter(|c| !c.finding_ids.is_empty())
            .count()
    }
}
