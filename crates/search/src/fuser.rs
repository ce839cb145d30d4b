//! Reciprocal Rank Fusion
//!
//! Each document's fused score is `Σ_i w_i / (k + rank_i)` over the lists
//! it appears in, with 1-indexed ranks and a smoothing constant `k`
//! (default 60, per the original RRF formulation). Documents below the
//! minimum fused score are dropped; the rest come back sorted by
//! descending score with node-id tie-break.

use nornic_core::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The standard RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One ranked input list. Entries are in rank order (best first); the
/// entry at index `i` has rank `i + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedList {
    /// Name of the producing ranker, for diagnostics ("vector", "bm25").
    pub source: String,
    /// Weight `w_i` for this list.
    pub weight: f64,
    /// Documents, best first.
    pub entries: Vec<NodeId>,
}

impl RankedList {
    /// Build a list.
    pub fn new(source: impl Into<String>, weight: f64, entries: Vec<NodeId>) -> Self {
        RankedList {
            source: source.into(),
            weight,
            entries,
        }
    }
}

/// One fused result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    /// The document.
    pub node_id: NodeId,
    /// Fused RRF score.
    pub score: f64,
    /// How many input lists contained the document.
    pub list_count: usize,
}

/// Fusion parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfConfig {
    /// Smoothing constant `k`.
    pub k: f64,
    /// Minimum fused score; lower-scoring documents are dropped.
    pub min_score: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        RrfConfig {
            k: DEFAULT_RRF_K,
            min_score: 0.0,
        }
    }
}

/// Fuse ranked lists with Reciprocal Rank Fusion.
pub fn rrf_fuse(lists: &[RankedList], config: &RrfConfig) -> Vec<FusedHit> {
    let mut fused: HashMap<NodeId, (f64, usize)> = HashMap::new();
    for list in lists {
        for (i, node_id) in list.entries.iter().enumerate() {
            let rank = (i + 1) as f64;
            let contribution = list.weight / (config.k + rank);
            let entry = fused.entry(*node_id).or_insert((0.0, 0));
            entry.0 += contribution;
            entry.1 += 1;
        }
    }

    let mut hits: Vec<FusedHit> = fused
        .into_iter()
        .filter(|(_, (score, _))| *score >= config.min_score)
        .map(|(node_id, (score, list_count))| FusedHit {
            node_id,
            score,
            list_count,
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    hits
}
