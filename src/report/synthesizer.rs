//! Report synthesis.
//!
//! The structure of a report (sections, claims, citations, disagreements)
//! is derived from the evidence set alone. The agent only contributes the
//! title and the section summaries, and every citation it gives is checked
//! against the evidence. Without the agent the report is still complete,
//! just terser.

use crate::agent::capability::{ClaimDigest, SectionDraft, SynthesisOutput, SynthesisRequest};
use crate::agent::{invoke_with_retry, AgentClient, AgentRequest, RetryPolicy};
use crate::analysis::{conflict_pairs, group_by_topic, stronger, EvidenceCluster, EvidenceSet};
use crate::error::SynthesisError;
use crate::models::{
    CitedClaim, Disagreement, Finding, FindingId, Query, Report, ReportMetadata,
    ReportSection, ReportStatus, SourceId,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds a [`Report`] from an evidence set.
pub struct ReportSynthesizer {
    agent: Arc<dyn AgentClient>,
    retry: RetryPolicy,
}

/// A section before narration, with the citation keys it may use.
struct Draft {
    heading: String,
    clusters: Vec<FindingId>,
    claims: Vec<CitedClaim>,
    allowed: HashSet<String>,
}

impl ReportSynthesizer {
    pub fn new(agent: Arc<dyn AgentClient>, retry: RetryPolicy) -> Self {
        Self { agent, retry }
    }

    /// Synthesize a report. With `narrate` unset the agent is not called.
    ///
    /// Findings whose source was never retrieved are left out and noted.
    pub async fn synthesize(
        &self,
        query: &Query,
        evidence: &EvidenceSet,
        topic_order: &[String],
        metadata: ReportMetadata,
        narrate: bool,
    ) -> Result<Report, SynthesisError> {
        if evidence.is_empty() {
            return Err(SynthesisError::EmptyEvidence);
        }

        let mut notes = Vec::new();
        let clusters = evidence.clusters();

        let mut cited: HashMap<&FindingId, CitedClaim> = HashMap::new();
        let mut untraceable = 0;
        for cluster in clusters {
            match cite(cluster, evidence) {
                Some(claim) => {
                    cited.insert(&cluster.id, claim);
                }
                None => untraceable += cluster.members.len(),
            }
        }
        if untraceable > 0 {
            warn!(
                phase = "synthesizing",
                "{} finding(s) reference sources that were never retrieved",
                untraceable
            );
            notes.push(format!(
                "{} finding(s) were excluded because their sources could not be traced.",
                untraceable
            ));
        }

        let disagreements: Vec<Disagreement> = conflict_pairs(clusters)
            .into_iter()
            .filter_map(|(a, b)| {
                Some(Disagreement {
                    topic: a.topic.clone(),
                    positions: vec![cited.get(&a.id)?.clone(), cited.get(&b.id)?.clone()],
                })
            })
            .collect();

        // A conflicting claim whose every counterpart is untraceable has no
        // disagreement to appear in, so it is reported as a plain claim.
        let disputed: HashSet<&FindingId> = disagreements
            .iter()
            .flat_map(|d| d.positions.iter())
            .flat_map(|p| p.finding_ids.iter())
            .collect();
        let uncontested = clusters
            .iter()
            .filter(|c| c.is_conflicting() && cited.contains_key(&c.id))
            .filter(|c| !c.members.iter().any(|id| disputed.contains(id)))
            .count();
        if uncontested > 0 {
            notes.push(format!(
                "{} claim(s) conflict only with untraceable findings and are listed without their counterpart.",
                uncontested
            ));
        }

        let mut drafts = Vec::new();
        for (topic, group) in group_by_topic(clusters, topic_order) {
            let members: Vec<&EvidenceCluster> = group
                .into_iter()
                .filter(|c| cited.contains_key(&c.id))
                .filter(|c| !c.members.iter().any(|id| disputed.contains(id)))
                .collect();
            if members.is_empty() {
                continue;
            }

            let mut allowed = HashSet::new();
            for cluster in &members {
                allowed.insert(cluster.id.to_string());
                allowed.extend(cluster.members.iter().map(|id| id.to_string()));
            }

            drafts.push(Draft {
                heading: topic,
                clusters: members.iter().map(|c| c.id.clone()).collect(),
                claims: members
                    .iter()
                    .filter_map(|c| cited.get(&c.id).cloned())
                    .collect(),
                allowed,
            });
        }

        if drafts.is_empty() && disagreements.is_empty() {
            return Err(SynthesisError::EmptyEvidence);
        }

        let narration = if narrate {
            self.narrate(query, &drafts, &disagreements).await
        } else {
            None
        };

        let (title, sections) = match narration {
            Some(output) => apply_narration(output, drafts, &mut notes),
            None => {
                if narrate {
                    notes.push(
                        "Narrative synthesis was unavailable; sections list the evidence directly."
                            .to_string(),
                    );
                }
                let sections: Vec<ReportSection> = drafts.into_iter().map(plain_section).collect();
                (format!("Research report: {}", query), sections)
            }
        };

        let report = Report {
            title,
            status: ReportStatus::Complete,
            sources: cited_sources(&sections, &disagreements, evidence),
            sections,
            disagreements,
            notes,
            metadata,
        };

        info!(
            phase = "synthesizing",
            "Report has {} section(s), {} disagreement(s), {} source(s)",
            report.sections.len(),
            report.disagreements.len(),
            report.sources.len()
        );

        Ok(report)
    }

    async fn narrate(
        &self,
        query: &Query,
        drafts: &[Draft],
        disagreements: &[Disagreement],
    ) -> Option<SynthesisOutput> {
        let request = AgentRequest::Synthesize(SynthesisRequest {
            query: query.to_string(),
            sections: drafts
                .iter()
                .map(|d| SectionDraft {
                    heading: d.heading.clone(),
                    claims: d
                        .clusters
                        .iter()
                        .zip(&d.claims)
                        .map(|(id, claim)| ClaimDigest {
                            citation: id.to_string(),
                            claim: claim.text.clone(),
                        })
                        .collect(),
                })
                .collect(),
            disagreements: disagreements
                .iter()
                .map(|d| {
                    let positions: Vec<&str> =
                        d.positions.iter().map(|p| p.text.as_str()).collect();
                    format!("{}: {}", d.topic, positions.join(" / "))
                })
                .collect(),
        });

        match invoke_with_retry(self.agent.as_ref(), &request, self.retry).await {
            Ok(output) => match output.into_synthesis() {
                Ok(synthesis) => Some(synthesis),
                Err(e) => {
                    warn!(phase = "synthesizing", "Synthesis output rejected: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!(
                    phase = "synthesizing",
                    "Synthesis agent failed ({}), falling back to plain report", e
                );
                None
            }
        }
    }
}

/// Citations for a cluster, restricted to traceable findings. The claim
/// text and confidence come from the strongest traceable member.
fn cite(cluster: &EvidenceCluster, evidence: &EvidenceSet) -> Option<CitedClaim> {
    let findings: Vec<&Finding> = cluster
        .members
        .iter()
        .filter_map(|id| evidence.finding(id))
        .filter(|f| evidence.is_traceable(f))
        .collect();

    let representative = findings.iter().copied().max_by(|a, b| stronger(a, b))?;
    let source_ids: BTreeSet<SourceId> = findings.iter().map(|f| f.source_id.clone()).collect();

    Some(CitedClaim {
        text: representative.claim.clone(),
        finding_ids: findings.iter().map(|f| f.id.clone()).collect(),
        source_ids: source_ids.into_iter().collect(),
        confidence: representative.confidence,
    })
}

fn plain_section(draft: Draft) -> ReportSection {
    let sources: BTreeSet<&SourceId> = draft
        .claims
        .iter()
        .flat_map(|c| c.source_ids.iter())
        .collect();
    let summary = format!(
        "{} finding(s) from {} source(s).",
        draft.claims.len(),
        sources.len()
    );

    ReportSection {
        heading: draft.heading,
        summary,
        claims: draft.claims,
    }
}

/// Attach agent summaries to the drafts. Summaries are matched by heading,
/// then by position. A summary citing nothing from its own section is
/// replaced by the plain one.
fn apply_narration(
    output: SynthesisOutput,
    drafts: Vec<Draft>,
    notes: &mut Vec<String>,
) -> (String, Vec<ReportSection>) {
    let by_heading: HashMap<String, usize> = output
        .sections
        .iter()
        .enumerate()
        .map(|(i, s)| (s.heading.trim().to_lowercase(), i))
        .collect();

    let mut dropped = 0;
    let mut ungrounded = 0;
    let mut sections = Vec::with_capacity(drafts.len());

    for (position, draft) in drafts.into_iter().enumerate() {
        let narrated = by_heading
            .get(&draft.heading.trim().to_lowercase())
            .copied()
            .or(if position < output.sections.len() {
                Some(position)
            } else {
                None
            })
            .map(|i| &output.sections[i]);

        let Some(narrated) = narrated else {
            sections.push(plain_section(draft));
            continue;
        };

        let valid = narrated
            .citations
            .iter()
            .filter(|c| draft.allowed.contains(c.trim()))
            .count();
        dropped += narrated.citations.len() - valid;

        if valid == 0 || narrated.summary.trim().is_empty() {
            ungrounded += 1;
            sections.push(plain_section(draft));
        } else {
            sections.push(ReportSection {
                heading: draft.heading,
                summary: narrated.summary.trim().to_string(),
                claims: draft.claims,
            });
        }
    }

    if dropped > 0 {
        debug!("Dropped {} unknown citation(s) from synthesis", dropped);
        notes.push(format!(
            "{} citation(s) in the narrative did not match any gathered finding and were dropped.",
            dropped
        ));
    }
    if ungrounded > 0 {
        notes.push(format!(
            "{} section summary(ies) lacked valid citations and were replaced by evidence counts.",
            ungrounded
        ));
    }

    (output.title.trim().to_string(), sections)
}

/// Every source cited by the report, ordered by id.
fn cited_sources(
    sections: &[ReportSection],
    disagreements: &[Disagreement],
    evidence: &EvidenceSet,
) -> Vec<crate::models::Source> {
    let ids: BTreeSet<&SourceId> = sections
        .iter()
        .flat_map(|s| s.claims.iter())
        .chain(disagreements.iter().flat_map(|d| d.positions.iter()))
        .flat_map(|c| c.source_ids.iter())
        .collect();

    ids.into_iter()
        .filter_map(|id| evidence.source(id).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use crate::research::testing::{MockAgent, SynthesisMode};
    use std::time::Duration;

    fn synthesizer(mode: SynthesisMode) -> ReportSynthesizer {
        ReportSynthesizer::new(
            Arc::new(MockAgent::new().synthesis(mode)),
            RetryPolicy {
                max_retries: 0,
                initial_backoff: Duration::from_millis(1),
            },
        )
    }

    fn query() -> Query {
        Query::parse("remote work and housing").unwrap()
    }

    fn evidence() -> EvidenceSet {
        let mut set = EvidenceSet::default();
        set.insert(
            vec![
                Finding::new("Suburban rents increased", "https://a.example", "rents", 0.9),
                Finding::new("Suburban rents increased", "https://b.example", "rents", 0.6),
                Finding::new("Office vacancy hit records", "https://c.example", "offices", 0.7),
                Finding::new("Downtown prices rose", "https://a.example", "prices", 0.5),
                Finding::new("Downtown prices fell", "https://c.example", "prices", 0.5),
            ],
            vec![
                Source::new("https://a.example", "A", "a"),
                Source::new("https://b.example", "B", "b"),
                Source::new("https://c.example", "C", "c"),
            ],
        );
        set
    }

    fn order() -> Vec<String> {
        vec!["offices".to_string(), "rents".to_string(), "prices".to_string()]
    }

    #[tokio::test]
    async fn test_sections_follow_topics_and_cite_findings() {
        let set = evidence();
        let report = synthesizer(SynthesisMode::Echo)
            .synthesize(&query(), &set, &order(), ReportMetadata::new(&query()), true)
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.title, "Findings on remote work and housing");

        let headings: Vec<&str> = report.sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["offices", "rents"]);
        assert_eq!(report.sections[1].summary, "Summary of rents");

        // Corroborated claim cites both of its sources
        let rents = &report.sections[1].claims[0];
        assert_eq!(rents.finding_ids.len(), 2);
        assert_eq!(rents.source_ids.len(), 2);

        for id in report.cited_finding_ids() {
            assert!(set.finding(&id).is_some());
        }
        assert_eq!(report.sources.len(), 3);
        assert!(report.notes.is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_become_disagreements() {
        let report = synthesizer(SynthesisMode::Echo)
            .synthesize(&query(), &evidence(), &order(), ReportMetadata::new(&query()), true)
            .await
            .unwrap();

        assert_eq!(report.disagreements.len(), 1);
        assert_eq!(report.disagreements[0].topic, "prices");
        assert_eq!(report.disagreements[0].positions.len(), 2);
        assert!(report
            .sections
            .iter()
            .flat_map(|s| s.claims.iter())
            .all(|c| !c.text.starts_with("Downtown prices")));
    }

    #[tokio::test]
    async fn test_unknown_citations_are_dropped_and_noted() {
        let report = synthesizer(SynthesisMode::BogusCitation)
            .synthesize(&query(), &evidence(), &order(), ReportMetadata::new(&query()), true)
            .await
            .unwrap();

        assert!(report.notes.iter().any(|n| n.contains("2 citation(s)")));
        assert_eq!(report.sections[0].summary, "Summary of offices");
    }

    #[tokio::test]
    async fn test_agent_failure_falls_back_to_plain_report() {
        let report = synthesizer(SynthesisMode::Fail)
            .synthesize(&query(), &evidence(), &order(), ReportMetadata::new(&query()), true)
            .await
            .unwrap();

        assert_eq!(report.title, "Research report: remote work and housing");
        assert_eq!(report.sections[1].summary, "1 finding(s) from 2 source(s).");
        assert!(report.notes.iter().any(|n| n.contains("unavailable")));
    }

    #[tokio::test]
    async fn test_untraceable_findings_are_excluded() {
        let mut set = evidence();
        set.insert(
            vec![Finding::new("Ghost towns appeared", "https://never.example", "rents", 1.0)],
            vec![],
        );

        let report = synthesizer(SynthesisMode::Echo)
            .synthesize(&query(), &set, &order(), ReportMetadata::new(&query()), false)
            .await
            .unwrap();

        assert!(report
            .sections
            .iter()
            .flat_map(|s| s.claims.iter())
            .all(|c| c.text != "Ghost towns appeared"));
        assert!(report.notes.iter().any(|n| n.contains("could not be traced")));
    }

    #[tokio::test]
    async fn test_claim_text_comes_from_traceable_member() {
        let mut set = EvidenceSet::default();
        set.insert(
            vec![
                Finding::new("Urban rents fell 4% in 2021", "https://a.example", "rents", 0.6),
                Finding::new("In 2021 urban rents fell 4%", "https://never.example", "rents", 0.9),
            ],
            vec![Source::new("https://a.example", "A", "a")],
        );
        assert_eq!(set.clusters().len(), 1);

        let report = synthesizer(SynthesisMode::Echo)
            .synthesize(&query(), &set, &order(), ReportMetadata::new(&query()), false)
            .await
            .unwrap();

        let claim = &report.sections[0].claims[0];
        assert_eq!(claim.text, "Urban rents fell 4% in 2021");
        assert!((claim.confidence - 0.6).abs() < f32::EPSILON);
        assert_eq!(claim.finding_ids.len(), 1);
        assert_eq!(claim.source_ids, vec!["https://a.example".to_string()]);
    }

    #[tokio::test]
    async fn test_conflict_with_untraceable_claim_keeps_grounded_side() {
        let mut set = EvidenceSet::default();
        set.insert(
            vec![
                Finding::new("Downtown prices rose", "https://a.example", "prices", 0.5),
                Finding::new("Downtown prices fell", "https://never.example", "prices", 0.5),
            ],
            vec![Source::new("https://a.example", "A", "a")],
        );
        assert_eq!(set.conflict_count(), 2);

        let report = synthesizer(SynthesisMode::Echo)
            .synthesize(&query(), &set, &order(), ReportMetadata::new(&query()), false)
            .await
            .unwrap();

        assert!(report.disagreements.is_empty());
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sections[0].heading, "prices");
        assert_eq!(report.sections[0].claims[0].text, "Downtown prices rose");
        assert!(report
            .notes
            .iter()
            .any(|n| n.contains("conflict only with untraceable findings")));
        assert!(report.notes.iter().any(|n| n.contains("could not be traced")));
    }

    #[tokio::test]
    async fn test_empty_evidence_is_an_error() {
        let err = synthesizer(SynthesisMode::Echo)
            .synthesize(
                &query(),
                &EvidenceSet::default(),
                &order(),
                ReportMetadata::new(&query()),
                true,
            )
            .await
            .unwrap_err();

        assert_eq!(err, SynthesisError::EmptyEvidence);
    }
}
