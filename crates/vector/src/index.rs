//! The vector index
//!
//! Contiguous storage: all embeddings live in one `Vec<f32>` of length
//! N × D, with a parallel node-id array and a node→slot map. Slots are
//! compacted on removal (last slot swaps into the hole), and the cluster
//! state is kept consistent with the swap under the same critical
//! section.

use crate::cluster::{ClusterState, KMeansConfig};
use crate::distance::{cosine_similarity, normalize};
use nornic_core::{NodeId, NornicError, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// One search result. `distance` is `1 - score`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matched node.
    pub node_id: NodeId,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// `1 - score`, for callers that think in distances.
    pub distance: f32,
}

pub(crate) struct Vectors {
    pub(crate) dim: usize,
    pub(crate) data: Vec<f32>,
    pub(crate) ids: Vec<NodeId>,
    pub(crate) slots: FxHashMap<NodeId, usize>,
}

impl Vectors {
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn vector(&self, slot: usize) -> &[f32] {
        &self.data[slot * self.dim..(slot + 1) * self.dim]
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndexStats {
    /// Stored embedding count.
    pub len: usize,
    /// Index dimension.
    pub dim: usize,
    /// Whether a clustering pass has run.
    pub clustered: bool,
    /// Cluster count (0 when not clustered).
    pub clusters: usize,
    /// Online updates since the last clustering pass.
    pub updates_since_cluster: usize,
}

/// Dense vector index with optional k-means acceleration.
///
/// Lock order: `vectors` before `clusters`, always.
pub struct VectorIndex {
    pub(crate) vectors: RwLock<Vectors>,
    pub(crate) clusters: RwLock<Option<ClusterState>>,
    pub(crate) config: KMeansConfig,
}

impl VectorIndex {
    /// Create an index for embeddings of dimension `dim`.
    pub fn new(dim: usize, config: KMeansConfig) -> Self {
        VectorIndex {
            vectors: RwLock::new(Vectors {
                dim,
                data: Vec::new(),
                ids: Vec::new(),
                slots: FxHashMap::default(),
            }),
            clusters: RwLock::new(None),
            config,
        }
    }

    /// Index dimension.
    pub fn dim(&self) -> usize {
        self.vectors.read().dim
    }

    /// Stored embedding count.
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add or overwrite the embedding for `node`.
    ///
    /// The vector is unit-normalized on ingest. Fails with
    /// `DimensionMismatch` when `vector.len() != dim`.
    pub fn add(&self, node: NodeId, vector: &[f32]) -> Result<()> {
        let mut vectors = self.vectors.write();
        if vector.len() != vectors.dim {
            return Err(NornicError::DimensionMismatch {
                expected: vectors.dim,
                got: vector.len(),
            });
        }
        let mut v = vector.to_vec();
        normalize(&mut v);

        let slot = if let Some(&slot) = vectors.slots.get(&node) {
            let dim = vectors.dim;
            vectors.data[slot * dim..(slot + 1) * dim].copy_from_slice(&v);
            slot
        } else {
            let slot = vectors.len();
            vectors.data.extend_from_slice(&v);
            vectors.ids.push(node);
            vectors.slots.insert(node, slot);
            slot
        };
        // Tier-1 online update: reassign this one embedding immediately
        // and queue the move for the next Tier-2 centroid pass.
        let mut clusters = self.clusters.write();
        if let Some(state) = clusters.as_mut() {
            state.reassign_slot(&vectors, slot);
        }
        Ok(())
    }

    /// Remove the embedding for `node`, if present. Returns whether an
    /// embedding was removed.
    pub fn remove(&self, node: NodeId) -> bool {
        let mut vectors = self.vectors.write();
        let Some(slot) = vectors.slots.remove(&node) else {
            return false;
        };
        let dim = vectors.dim;
        let last = vectors.len() - 1;

        if slot != last {
            let moved_id = vectors.ids[last];
            let (head, tail) = vectors.data.split_at_mut(last * dim);
            head[slot * dim..(slot + 1) * dim].copy_from_slice(&tail[..dim]);
            vectors.ids[slot] = moved_id;
            vectors.slots.insert(moved_id, slot);
        }
        vectors.data.truncate(last * dim);
        vectors.ids.truncate(last);

        let mut clusters = self.clusters.write();
        if let Some(state) = clusters.as_mut() {
            state.remove_slot(slot, last);
        }
        true
    }

    /// Fetch a copy of the stored (normalized) embedding.
    pub fn get(&self, node: NodeId) -> Option<Vec<f32>> {
        let vectors = self.vectors.read();
        vectors
            .slots
            .get(&node)
            .map(|&slot| vectors.vector(slot).to_vec())
    }

    /// Brute-force cosine search: the query is compared against every
    /// stored vector, returning the top-k by descending score. Ties break
    /// by insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let vectors = self.vectors.read();
        if query.len() != vectors.dim {
            return Err(NornicError::DimensionMismatch {
                expected: vectors.dim,
                got: query.len(),
            });
        }
        if top_k == 0 || vectors.len() == 0 {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = (0..vectors.len())
            .map(|slot| (slot, cosine_similarity(&q, vectors.vector(slot))))
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(slot, score)| SearchHit {
                node_id: vectors.ids[slot],
                score,
                distance: 1.0 - score,
            })
            .collect())
    }

    /// Observability counters.
    pub fn stats(&self) -> VectorIndexStats {
        let vectors = self.vectors.read();
        let clusters = self.clusters.read();
        VectorIndexStats {
            len: vectors.len(),
            dim: vectors.dim,
            clustered: clusters.is_some(),
            clusters: clusters.as_ref().map(|c| c.k).unwrap_or(0),
            updates_since_cluster: clusters
                .as_ref()
                .map(|c| c.updates_since_cluster)
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(dim: usize) -> VectorIndex {
        VectorIndex::new(dim, KMeansConfig::default())
    }

    #[test]
    fn test_add_and_round_trip_search() {
        let idx = index(4);
        idx.add(NodeId::new(1), &[1.0, 0.0, 0.0, 0.0]).unwrap();
        idx.add(NodeId::new(2), &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, NodeId::new(1));
        assert!(hits[0].score >= 1.0 - 1e-5);
        assert!(hits[0].distance <= 1e-5);
    }

    #[test]
    fn test_dimension_checked() {
        let idx = index(3);
        let err = idx.add(NodeId::new(1), &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            NornicError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
        let err = idx.search(&[1.0], 5).unwrap_err();
        assert!(matches!(err, NornicError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let idx = index(2);
        idx.add(NodeId::new(1), &[1.0, 0.0]).unwrap();
        idx.add(NodeId::new(1), &[0.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 1);
        let hits = idx.search(&[0.0, 1.0], 1).unwrap();
        assert!(hits[0].score >= 1.0 - 1e-5);
    }

    #[test]
    fn test_normalized_on_ingest() {
        let idx = index(2);
        idx.add(NodeId::new(1), &[10.0, 0.0]).unwrap();
        let v = idx.get(NodeId::new(1)).unwrap();
        assert!((v[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_break_by_insertion_order() {
        let idx = index(2);
        // Same vector for several nodes: equal scores.
        for id in [5u64, 2, 9, 1] {
            idx.add(NodeId::new(id), &[1.0, 0.0]).unwrap();
        }
        let hits = idx.search(&[1.0, 0.0], 4).unwrap();
        let order: Vec<u64> = hits.iter().map(|h| h.node_id.as_u64()).collect();
        assert_eq!(order, vec![5, 2, 9, 1]);
    }

    #[test]
    fn test_remove_swaps_last_slot() {
        let idx = index(2);
        idx.add(NodeId::new(1), &[1.0, 0.0]).unwrap();
        idx.add(NodeId::new(2), &[0.0, 1.0]).unwrap();
        idx.add(NodeId::new(3), &[-1.0, 0.0]).unwrap();

        assert!(idx.remove(NodeId::new(1)));
        assert!(!idx.remove(NodeId::new(1)));
        assert_eq!(idx.len(), 2);
        assert!(idx.get(NodeId::new(1)).is_none());

        // The survivors are still searchable.
        let hits = idx.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].node_id, NodeId::new(2));
        let hits = idx.search(&[-1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].node_id, NodeId::new(3));
    }

    #[test]
    fn test_search_empty_and_k_zero() {
        let idx = index(2);
        assert!(idx.search(&[1.0, 0.0], 5).unwrap().is_empty());
        idx.add(NodeId::new(1), &[1.0, 0.0]).unwrap();
        assert!(idx.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_search_ordering() {
        let idx = index(2);
        idx.add(NodeId::new(1), &[1.0, 0.0]).unwrap();
        idx.add(NodeId::new(2), &[0.8, 0.2]).unwrap();
        idx.add(NodeId::new(3), &[0.0, 1.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].node_id, NodeId::new(1));
        assert_eq!(hits[1].node_id, NodeId::new(2));
        assert_eq!(hits[2].node_id, NodeId::new(3));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
