//! Claim normalization and similarity.
//!
//! A claim is reduced to a [`ClaimSignature`]: the set of its content tokens
//! plus a polarity bit. Negation words and directional antonyms ("fell" vs
//! "rose") do not count as tokens; they flip the polarity instead, so
//! "rents rose" and "rents did not rise" share tokens but disagree.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "to", "for", "and", "or", "is", "are", "was", "were",
    "be", "been", "being", "by", "with", "as", "at", "that", "this", "these", "those", "it",
    "its", "from", "has", "have", "had", "did", "do", "does", "than", "there", "their", "which",
    "will", "would", "can", "could", "also", "very",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nor", "cannot", "cant", "doesnt", "dont", "didnt", "isnt",
    "arent", "wasnt", "werent", "wont", "hasnt", "havent", "hadnt", "without",
];

const UPWARD: &[&str] = &[
    "increase", "increases", "increased", "increasing", "rise", "rises", "rose", "risen",
    "rising", "grow", "grows", "grew", "grown", "growing", "higher", "more", "up", "gain",
    "gains", "gained",
];

const DOWNWARD: &[&str] = &[
    "decrease", "decreases", "decreased", "decreasing", "fall", "falls", "fell", "fallen",
    "falling", "drop", "drops", "dropped", "dropping", "decline", "declines", "declined",
    "declining", "shrink", "shrinks", "shrank", "shrinking", "lower", "less", "fewer", "down",
    "loss", "losses", "lost",
];

/// Canonical token shared by both directions of change.
const DIRECTION_TOKEN: &str = "increase";

/// Normalized form of a claim used for deduplication and conflict detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSignature {
    tokens: BTreeSet<String>,
    negated: bool,
}

impl ClaimSignature {
    pub fn of(claim: &str) -> Self {
        let cleaned: String = claim
            .to_lowercase()
            .chars()
            .filter(|c| *c != '\'' && *c != '\u{2019}')
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        let mut tokens = BTreeSet::new();
        let mut flips = 0usize;

        for word in cleaned.split_whitespace() {
            if NEGATIONS.contains(&word) {
                flips += 1;
            } else if UPWARD.contains(&word) {
                tokens.insert(DIRECTION_TOKEN.to_string());
            } else if DOWNWARD.contains(&word) {
                tokens.insert(DIRECTION_TOKEN.to_string());
                flips += 1;
            } else if !STOP_WORDS.contains(&word) {
                tokens.insert(stem(word).to_string());
            }
        }

        Self {
            tokens,
            negated: flips % 2 == 1,
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Jaccard similarity of the content tokens, polarity ignored.
    pub fn similarity(&self, other: &ClaimSignature) -> f64 {
        let union = self.tokens.union(&other.tokens).count();
        if union == 0 {
            return 0.0;
        }
        let intersection = self.tokens.intersection(&other.tokens).count();
        intersection as f64 / union as f64
    }

    /// Same content, same polarity.
    pub fn duplicates(&self, other: &ClaimSignature, threshold: f64) -> bool {
        self.negated == other.negated && self.similarity(other) >= threshold
    }

    /// Same topic, opposite polarity.
    pub fn contradicts(&self, other: &ClaimSignature, threshold: f64) -> bool {
        self.negated != other.negated && self.similarity(other) >= threshold
    }

    /// Stable textual key of the signature.
    pub fn key(&self) -> String {
        let joined = self.tokens.iter().cloned().collect::<Vec<_>>().join(" ");
        if self.negated {
            format!("!{}", joined)
        } else {
            joined
        }
    }
}

/// Plural/third-person "s" only.
fn stem(word: &str) -> &str {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}
