//! Evidence analysis: claim similarity, the evidence set and its aggregator.

pub mod aggregator;
pub mod evidence;
pub mod similarity;

pub use aggregator::*;
pub use evidence::{stronger, DedupPolicy, EvidenceCluster, EvidenceSet};
pub use similarity::ClaimSignature;
