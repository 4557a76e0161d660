//! The deduplicated, conflict-aware evidence set.
//!
//! Findings are stored append-only, keyed by their content-derived id.
//! Clusters are recomputed from the complete finding set after every
//! merge as the connected components of the "duplicates" relation, so the
//! result depends only on which findings are present, never on the order
//! in which they arrived. Merging a set into itself is a no-op.

use crate::analysis::similarity::ClaimSignature;
use crate::config::ResearchConfig;
use crate::models::{Finding, FindingId, Source, SourceId};
use std::collections::{BTreeMap, BTreeSet};

/// Thresholds used to relate two claims.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupPolicy {
    /// Similarity at or above which same-polarity claims are merged.
    pub similarity_threshold: f64,
    /// Similarity at or above which opposite-polarity claims conflict.
    pub conflict_threshold: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            conflict_threshold: 0.5,
        }
    }
}

impl From<&ResearchConfig> for DedupPolicy {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            conflict_threshold: config.conflict_threshold,
        }
    }
}

/// A group of corroborating findings.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceCluster {
    /// Smallest member id; stable for a given member set.
    pub id: FindingId,
    /// Claim signature key of the representative.
    pub signature: String,
    /// Claim text of the representative (highest confidence member).
    pub claim: String,
    /// Sub-question served by the representative.
    pub topic: String,
    pub members: BTreeSet<FindingId>,
    pub source_ids: BTreeSet<SourceId>,
    pub sub_questions: BTreeSet<String>,
    /// Highest member confidence.
    pub confidence: f32,
    /// Ids of clusters making contradictory claims on the same topic.
    pub conflicts_with: BTreeSet<FindingId>,
}

impl EvidenceCluster {
    pub fn is_conflicting(&self) -> bool {
        !self.conflicts_with.is_empty()
    }
}

/// Accumulated evidence for one research run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceSet {
    policy: DedupPolicy,
    findings: BTreeMap<FindingId, Finding>,
    sources: BTreeMap<SourceId, Source>,
    clusters: Vec<EvidenceCluster>,
}

impl Default for EvidenceSet {
    fn default() -> Self {
        Self::new(DedupPolicy::default())
    }
}

impl EvidenceSet {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            findings: BTreeMap::new(),
            sources: BTreeMap::new(),
            clusters: Vec::new(),
        }
    }

    /// Add findings and the sources they were read from. Returns how many
    /// findings were not already present.
    pub fn insert(
        &mut self,
        findings: impl IntoIterator<Item = Finding>,
        sources: impl IntoIterator<Item = Source>,
    ) -> usize {
        let mut added = 0;

        for source in sources {
            let merged = match self.sources.remove(&source.id) {
                Some(existing) => existing.earliest(source),
                None => source,
            };
            self.sources.insert(merged.id.clone(), merged);
        }

        for finding in findings {
            match self.findings.get_mut(&finding.id) {
                Some(existing) => {
                    if finding.confidence > existing.confidence {
                        existing.confidence = finding.confidence;
                    }
                }
                None => {
                    self.findings.insert(finding.id.clone(), finding);
                    added += 1;
                }
            }
        }

        self.recluster();
        added
    }

    /// Merge another evidence set into this one.
    pub fn merge(&mut self, other: &EvidenceSet) -> usize {
        self.insert(
            other.findings.values().cloned(),
            other.sources.values().cloned(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.values()
    }

    pub fn finding(&self, id: &FindingId) -> Option<&Finding> {
        self.findings.get(id)
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn clusters(&self) -> &[EvidenceCluster] {
        &self.clusters
    }

    pub fn conflict_count(&self) -> usize {
        self.clusters.iter().filter(|c| c.is_conflicting()).count()
    }

    /// Whether a finding's source was actually retrieved in this run.
    pub fn is_traceable(&self, finding: &Finding) -> bool {
        self.sources.contains_key(&finding.source_id)
    }

    /// One line per cluster, strongest first, for agent prompts.
    pub fn digest(&self, limit: usize) -> Vec<String> {
        let mut clusters: Vec<&EvidenceCluster> = self.clusters.iter().collect();
        clusters.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        clusters
            .into_iter()
            .take(limit)
            .map(|c| {
                let marker = if c.is_conflicting() { " (disputed)" } else { "" };
                format!(
                    "{}{} [{} source(s)]",
                    c.claim,
                    marker,
                    c.source_ids.len()
                )
            })
            .collect()
    }

    fn recluster(&mut self) {
        let items: Vec<(&Finding, ClaimSignature)> = self
            .findings
            .values()
            .map(|f| (f, ClaimSignature::of(&f.claim)))
            .collect();

        let mut components = UnionFind::new(items.len());
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                if items[i]
                    .1
                    .duplicates(&items[j].1, self.policy.similarity_threshold)
                {
                    components.union(i, j);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..items.len() {
            groups.entry(components.find(i)).or_default().push(i);
        }

        let mut member_of = vec![0usize; items.len()];
        let mut clusters: Vec<EvidenceCluster> = Vec::with_capacity(groups.len());

        for members in groups.values() {
            let representative = members
                .iter()
                .copied()
                .max_by(|&a, &b| stronger(items[a].0, items[b].0))
                .unwrap_or(members[0]);
            let (rep, rep_signature) = &items[representative];

            for &m in members {
                member_of[m] = clusters.len();
            }

            clusters.push(EvidenceCluster {
                id: items[members[0]].0.id.clone(),
                signature: rep_signature.key(),
                claim: rep.claim.clone(),
                topic: rep.sub_question.clone(),
                members: members.iter().map(|&m| items[m].0.id.clone()).collect(),
                source_ids: members
                    .iter()
                    .map(|&m| items[m].0.source_id.clone())
                    .collect(),
                sub_questions: members
                    .iter()
                    .map(|&m| items[m].0.sub_question.clone())
                    .collect(),
                confidence: rep.confidence,
                conflicts_with: BTreeSet::new(),
            });
        }

        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                let (ci, cj) = (member_of[i], member_of[j]);
                if ci != cj
                    && items[i]
                        .1
                        .contradicts(&items[j].1, self.policy.conflict_threshold)
                {
                    let (id_i, id_j) = (clusters[ci].id.clone(), clusters[cj].id.clone());
                    clusters[ci].conflicts_with.insert(id_j);
                    clusters[cj].conflicts_with.insert(id_i);
                }
            }
        }

        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        self.clusters = clusters;
    }
}

/// Order findings by confidence, preferring the smaller id on ties, so the
/// maximum is the representative of a group.
pub fn stronger(a: &Finding, b: &Finding) -> std::cmp::Ordering {
    a.confidence
        .partial_cmp(&b.confidence)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.id.cmp(&a.id))
}

/// Disjoint-set forest over finding indices.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so component roots follow id order.
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(claim: &str, source: &str, question: &str, confidence: f32) -> Finding {
        Finding::new(claim, source, question, confidence)
    }

    fn source(id: &str) -> Source {
        Source::new(id, id, "content")
    }

    fn sample() -> (Vec<Finding>, Vec<Source>) {
        let findings = vec![
            finding("Urban rents fell 4% in 2021", "https://a.example", "economics", 0.6),
            finding("In 2021 urban rents fell 4%", "https://b.example", "economics", 0.9),
            finding("Urban rents rose 4% in 2021", "https://c.example", "economics", 0.7),
            finding("Young professionals left city centers", "https://d.example", "demographics", 0.8),
            finding("Cities relaxed zoning for conversions", "https://e.example", "policy", 0.5),
        ];
        let sources = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| source(&format!("https://{}.example", s)))
            .collect();
        (findings, sources)
    }

    #[test]
    fn test_duplicates_merge_with_combined_sources() {
        let (findings, sources) = sample();
        let mut set = EvidenceSet::default();
        let added = set.insert(findings, sources);

        assert_eq!(added, 5);
        assert_eq!(set.len(), 5);
        assert_eq!(set.clusters().len(), 4);

        let fell = set
            .clusters()
            .iter()
            .find(|c| c.members.len() == 2)
            .unwrap();
        assert_eq!(fell.confidence, 0.9);
        assert_eq!(fell.claim, "In 2021 urban rents fell 4%");
        assert!(fell.source_ids.contains("https://a.example"));
        assert!(fell.source_ids.contains("https://b.example"));
    }

    #[test]
    fn test_conflicts_are_kept_and_flagged() {
        let (findings, sources) = sample();
        let mut set = EvidenceSet::default();
        set.insert(findings, sources);

        assert_eq!(set.conflict_count(), 2);
        let conflicting: Vec<_> = set.clusters().iter().filter(|c| c.is_conflicting()).collect();
        assert!(conflicting.iter().any(|c| c.claim.contains("rose")));
        assert!(conflicting.iter().any(|c| c.claim.contains("fell")));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let (findings, sources) = sample();

        let mut forward = EvidenceSet::default();
        forward.insert(findings.clone(), sources.clone());

        let mut reversed = EvidenceSet::default();
        for (f, s) in findings.iter().rev().zip(sources.iter().rev()) {
            reversed.insert(vec![f.clone()], vec![s.clone()]);
        }

        let mut interleaved = EvidenceSet::default();
        for i in [3, 0, 4, 2, 1] {
            interleaved.insert(vec![findings[i].clone()], vec![]);
        }
        interleaved.insert(vec![], sources.clone());

        assert_eq!(forward, reversed);
        assert_eq!(forward, interleaved);
    }

    #[test]
    fn test_self_merge_is_idempotent() {
        let (findings, sources) = sample();
        let mut set = EvidenceSet::default();
        set.insert(findings, sources);

        let before = set.clone();
        let snapshot = set.clone();
        let added = set.merge(&snapshot);

        assert_eq!(added, 0);
        assert_eq!(set, before);
    }

    #[test]
    fn test_repeated_finding_keeps_higher_confidence() {
        let mut set = EvidenceSet::default();
        set.insert(
            vec![finding("Vacancy rates rose", "https://a.example", "q", 0.3)],
            vec![source("https://a.example")],
        );
        let added = set.insert(
            vec![finding("Vacancy rates rose", "https://a.example", "q", 0.8)],
            vec![],
        );

        assert_eq!(added, 0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.clusters()[0].confidence, 0.8);
    }

    #[test]
    fn test_traceability() {
        let mut set = EvidenceSet::default();
        let orphan = finding("Unsourced claim", "https://ghost.example", "q", 0.5);
        set.insert(vec![orphan.clone()], vec![source("https://a.example")]);

        assert!(!set.is_traceable(&orphan));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_digest_marks_disputes() {
        let (findings, sources) = sample();
        let mut set = EvidenceSet::default();
        set.insert(findings, sources);

        let digest = set.digest(10);
        assert_eq!(digest.len(), 4);
        assert!(digest[0].contains("2 source(s)"));
        assert!(digest.iter().any(|line| line.contains("(disputed)")));
    }
}
