//! Evidence aggregation and statistics.
//!
//! The [`EvidenceAggregator`] is the only writer of a run's [`EvidenceSet`].
//! Workers hand it their findings concurrently; each merge is a critical
//! section so deduplication always sees a consistent set. The free functions
//! group and rank clusters for report generation.

use crate::analysis::evidence::{DedupPolicy, EvidenceCluster, EvidenceSet};
use crate::models::{Finding, Source};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

/// Serializes merges into the run's evidence set.
pub struct EvidenceAggregator {
    evidence: Mutex<EvidenceSet>,
}

impl EvidenceAggregator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            evidence: Mutex::new(EvidenceSet::new(policy)),
        }
    }

    /// Merge one worker's complete batch. Returns the number of new findings.
    pub async fn merge(&self, findings: Vec<Finding>, sources: Vec<Source>) -> usize {
        let batch = findings.len();
        let mut evidence = self.evidence.lock().await;
        let added = evidence.insert(findings, sources);
        debug!(
            "Merged {} findings ({} new), evidence now {} findings in {} clusters",
            batch,
            added,
            evidence.len(),
            evidence.clusters().len()
        );
        added
    }

    /// Copy of the current evidence set.
    pub async fn snapshot(&self) -> EvidenceSet {
        self.evidence.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.evidence.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.evidence.lock().await.is_empty()
    }
}

/// Group clusters by the sub-question their representative answers,
/// preserving the order in which topics appear in `topic_order`.
pub fn group_by_topic<'a>(
    clusters: &'a [EvidenceCluster],
    topic_order: &[String],
) -> Vec<(String, Vec<&'a EvidenceCluster>)> {
    let mut grouped: BTreeMap<&str, Vec<&EvidenceCluster>> = BTreeMap::new();

    for cluster in clusters {
        grouped.entry(cluster.topic.as_str()).or_default().push(cluster);
    }

    // Strongest claims first within each topic
    for group in grouped.values_mut() {
        sort_by_confidence(group);
    }

    let mut ordered = Vec::with_capacity(grouped.len());
    for topic in topic_order {
        if let Some(group) = grouped.remove(topic.as_str()) {
            ordered.push((topic.clone(), group));
        }
    }
    for (topic, group) in grouped {
        ordered.push((topic.to_string(), group));
    }

    ordered
}

/// Sort clusters by confidence, then corroboration, then id.
pub fn sort_by_confidence(clusters: &mut [&EvidenceCluster]) {
    clusters.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.source_ids.len().cmp(&a.source_ids.len()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Pairs of mutually conflicting clusters, each pair reported once.
pub fn conflict_pairs(clusters: &[EvidenceCluster]) -> Vec<(&EvidenceCluster, &EvidenceCluster)> {
    let by_id: HashMap<_, _> = clusters.iter().map(|c| (&c.id, c)).collect();
    let mut pairs = Vec::new();

    for cluster in clusters {
        for other_id in &cluster.conflicts_with {
            if cluster.id < *other_id {
                if let Some(other) = by_id.get(other_id) {
                    pairs.push((cluster, *other));
                }
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn batch(question: &str, claims: &[(&str, &str)]) -> (Vec<Finding>, Vec<Source>) {
        let findings = claims
            .iter()
            .map(|(claim, url)| Finding::new(*claim, *url, question, 0.7))
            .collect();
        let sources = claims
            .iter()
            .map(|(_, url)| Source::new(*url, *url, "text"))
            .collect();
        (findings, sources)
    }

    #[tokio::test]
    async fn test_concurrent_merges_are_serialized() {
        let aggregator = Arc::new(EvidenceAggregator::new(DedupPolicy::default()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("https://site{}.example", i);
                let claim = format!("Claim number {} about housing", i);
                let (findings, sources) = batch("q", &[(claim.as_str(), url.as_str())]);
                aggregator.merge(findings, sources).await
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 8);
        assert_eq!(aggregator.len().await, 8);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let aggregator = EvidenceAggregator::new(DedupPolicy::default());
        let (findings, sources) = batch("q", &[("Rents rose", "https://a.example")]);
        aggregator.merge(findings, sources).await;

        let snapshot = aggregator.snapshot().await;
        let (findings, sources) = batch("q", &[("Offices emptied", "https://b.example")]);
        aggregator.merge(findings, sources).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(aggregator.len().await, 2);
    }

    #[test]
    fn test_group_by_topic_follows_plan_order() {
        let mut set = EvidenceSet::default();
        let (f1, s1) = batch("policy", &[("Zoning changed", "https://a.example")]);
        let (f2, s2) = batch("economics", &[("Prices moved", "https://b.example")]);
        set.insert(f1.into_iter().chain(f2), s1.into_iter().chain(s2));

        let order = vec!["economics".to_string(), "policy".to_string()];
        let grouped = group_by_topic(set.clusters(), &order);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "economics");
        assert_eq!(grouped[1].0, "policy");
    }

    #[test]
    fn test_conflict_pairs_reported_once() {
        let mut set = EvidenceSet::default();
        let (findings, sources) = batch(
            "q",
            &[
                ("Downtown rents rose", "https://a.example"),
                ("Downtown rents fell", "https://b.example"),
            ],
        );
        set.insert(findings, sources);

        let pairs = conflict_pairs(set.clusters());
        assert_eq!(pairs.len(), 1);
    }
}
