//! K-means clustering over the vector index
//!
//! `cluster()` partitions the stored embeddings into K clusters (chosen
//! or automatic), after which `search_with_clusters` restricts exact
//! cosine search to the members of the nearest centroids. Online updates
//! keep assignments roughly current between full passes:
//!
//! - **Tier 1**: every add/overwrite reassigns that one embedding to its
//!   nearest centroid and queues the move.
//! - **Tier 2**: `update_centroids_batch` recomputes the centroid of
//!   every cluster touched by queued moves.
//!
//! A full recluster is signaled when more than 10% of the index changed,
//! when accumulated centroid drift exceeds the configured threshold, or
//! when the last pass is over an hour old.

use crate::distance::{cosine_similarity, normalize, squared_euclidean};
use crate::index::{SearchHit, VectorIndex, Vectors};
use nornic_core::{NornicError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Centroid initialization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitMethod {
    /// Uniform-random choice of K distinct stored vectors.
    Random,
    /// K-means++: each next centroid weighted by squared distance to the
    /// nearest already-chosen one.
    #[default]
    KMeansPlusPlus,
}

/// K-means configuration.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Cluster count. `None` selects `sqrt(N/2)` clamped to `[10, 1000]`.
    pub k: Option<usize>,
    /// Centroid initialization.
    pub init: InitMethod,
    /// Iteration cap per pass.
    pub max_iterations: usize,
    /// Convergence threshold on centroid movement (squared distance).
    pub tolerance: f32,
    /// Accumulated Tier-2 drift that forces a recluster.
    pub drift_threshold: f32,
    /// Fraction of the index updated since the last pass that forces a
    /// recluster.
    pub recluster_update_fraction: f64,
    /// Age of the last pass that forces a recluster.
    pub recluster_age: Duration,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        KMeansConfig {
            k: None,
            init: InitMethod::KMeansPlusPlus,
            max_iterations: 50,
            tolerance: 1e-4,
            drift_threshold: 0.1,
            recluster_update_fraction: 0.10,
            recluster_age: Duration::from_secs(3600),
        }
    }
}

/// Automatic K: `sqrt(N/2)` clamped to `[10, 1000]`, never above N.
pub(crate) fn auto_k(n: usize) -> usize {
    let k = ((n as f64 / 2.0).sqrt()).round() as usize;
    k.clamp(10, 1000).min(n.max(1))
}

/// One queued Tier-1 move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingUpdate {
    pub slot: usize,
    pub old: Option<u32>,
    pub new: u32,
}

/// Results of a clustering pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStats {
    /// Cluster count used.
    pub k: usize,
    /// Iterations executed before convergence or the cap.
    pub iterations: usize,
    /// Whether the pass converged (no reassignments / below tolerance).
    pub converged: bool,
}

pub(crate) struct ClusterState {
    pub k: usize,
    pub dim: usize,
    /// K × dim centroid block.
    pub centroids: Vec<f32>,
    /// Per-slot assignment; `None` only transiently for brand-new slots.
    pub assignments: Vec<Option<u32>>,
    /// Reverse map cluster → member slots.
    pub reverse: Vec<Vec<usize>>,
    pub pending: Vec<PendingUpdate>,
    pub iterations: usize,
    pub last_clustered: Instant,
    pub updates_since_cluster: usize,
    /// Max centroid movement accumulated by Tier-2 updates.
    pub drift: f32,
}

impl ClusterState {
    pub(crate) fn centroid(&self, c: u32) -> &[f32] {
        let c = c as usize;
        &self.centroids[c * self.dim..(c + 1) * self.dim]
    }

    pub(crate) fn nearest_centroid(&self, v: &[f32]) -> (u32, f32) {
        let mut best = 0u32;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.k {
            let d = squared_euclidean(v, self.centroid(c as u32));
            if d < best_dist {
                best_dist = d;
                best = c as u32;
            }
        }
        (best, best_dist)
    }

    /// Tier-1 reassignment for one slot after an add or overwrite.
    pub(crate) fn reassign_slot(&mut self, vectors: &Vectors, slot: usize) {
        while self.assignments.len() < vectors.len() {
            self.assignments.push(None);
        }
        let old = self.assignments[slot];
        let (new, _) = self.nearest_centroid(vectors.vector(slot));
        self.updates_since_cluster += 1;
        if old == Some(new) {
            return;
        }
        if let Some(old_c) = old {
            self.reverse[old_c as usize].retain(|&s| s != slot);
        }
        self.reverse[new as usize].push(slot);
        self.assignments[slot] = Some(new);
        self.pending.push(PendingUpdate { slot, old, new });
    }

    /// Keep state consistent with a swap-remove of `slot` (the last slot
    /// `last` moved into its place).
    pub(crate) fn remove_slot(&mut self, slot: usize, last: usize) {
        if self.assignments.is_empty() {
            return;
        }
        if let Some(c) = self.assignments[slot] {
            self.reverse[c as usize].retain(|&s| s != slot);
        }
        if slot != last {
            let moved = self.assignments[last];
            self.assignments[slot] = moved;
            if let Some(c) = moved {
                for s in self.reverse[c as usize].iter_mut() {
                    if *s == last {
                        *s = slot;
                    }
                }
            }
        }
        self.assignments.truncate(last);
        self.pending.retain(|p| p.slot != slot && p.slot != last);
        self.updates_since_cluster += 1;
    }
}

impl VectorIndex {
    /// Run a full k-means pass over the stored embeddings.
    ///
    /// Holds the vector lock for reading and the cluster lock for
    /// writing, in that order. Empty clusters retain their previous
    /// position. Terminates when no assignment changes, when centroid
    /// movement falls below the tolerance, or at the iteration cap.
    pub fn cluster(&self) -> Result<ClusterStats> {
        let vectors = self.vectors.read();
        let n = vectors.len();
        let dim = vectors.dim;
        if n == 0 {
            *self.clusters.write() = None;
            return Err(NornicError::invalid_input("cannot cluster an empty index"));
        }

        let k = self.config.k.unwrap_or_else(|| auto_k(n)).clamp(1, n);
        let mut rng = rand::thread_rng();

        let mut centroids = match self.config.init {
            InitMethod::Random => init_random(&vectors, k, &mut rng),
            InitMethod::KMeansPlusPlus => init_kmeans_pp(&vectors, k, &mut rng),
        };

        // Scratch buffers sized once; the iteration loop is allocation-free.
        let mut assignments: Vec<u32> = vec![0; n];
        let mut sums: Vec<f32> = vec![0.0; k * dim];
        let mut counts: Vec<usize> = vec![0; k];

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.config.max_iterations {
            iterations += 1;

            // Assignment pass.
            let mut changed = 0usize;
            for slot in 0..n {
                let v = vectors.vector(slot);
                let mut best = 0u32;
                let mut best_dist = f32::INFINITY;
                for c in 0..k {
                    let d = squared_euclidean(v, &centroids[c * dim..(c + 1) * dim]);
                    if d < best_dist {
                        best_dist = d;
                        best = c as u32;
                    }
                }
                if assignments[slot] != best || iterations == 1 {
                    if assignments[slot] != best {
                        changed += 1;
                    }
                    assignments[slot] = best;
                }
            }
            if iterations > 1 && changed == 0 {
                converged = true;
                break;
            }

            // Update pass.
            sums.iter_mut().for_each(|x| *x = 0.0);
            counts.iter_mut().for_each(|c| *c = 0);
            for slot in 0..n {
                let c = assignments[slot] as usize;
                counts[c] += 1;
                let v = vectors.vector(slot);
                for (s, x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(v) {
                    *s += x;
                }
            }
            let mut max_move = 0.0f32;
            for c in 0..k {
                if counts[c] == 0 {
                    // Empty cluster keeps its previous position.
                    continue;
                }
                let inv = 1.0 / counts[c] as f32;
                let target = &mut centroids[c * dim..(c + 1) * dim];
                let mut moved = 0.0f32;
                for (t, s) in target.iter_mut().zip(&sums[c * dim..(c + 1) * dim]) {
                    let next = s * inv;
                    let d = next - *t;
                    moved += d * d;
                    *t = next;
                }
                max_move = max_move.max(moved);
            }
            if max_move < self.config.tolerance {
                converged = true;
                break;
            }
        }

        // Re-align assignments with the final centroid positions: the
        // tolerance and iteration-cap exits land right after an update
        // pass, and every stored assignment must point at its nearest
        // centroid when this returns.
        for slot in 0..n {
            let v = vectors.vector(slot);
            let mut best = 0u32;
            let mut best_dist = f32::INFINITY;
            for c in 0..k {
                let d = squared_euclidean(v, &centroids[c * dim..(c + 1) * dim]);
                if d < best_dist {
                    best_dist = d;
                    best = c as u32;
                }
            }
            assignments[slot] = best;
        }

        // Rebuild the reverse map for candidate lookup.
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (slot, &c) in assignments.iter().enumerate() {
            reverse[c as usize].push(slot);
        }

        info!(n, k, iterations, converged, "k-means pass complete");
        *self.clusters.write() = Some(ClusterState {
            k,
            dim,
            centroids,
            assignments: assignments.iter().map(|&c| Some(c)).collect(),
            reverse,
            pending: Vec::new(),
            iterations,
            last_clustered: Instant::now(),
            updates_since_cluster: 0,
            drift: 0.0,
        });

        Ok(ClusterStats {
            k,
            iterations,
            converged,
        })
    }

    /// Cluster-accelerated search: exact cosine over the members of the
    /// `n_clusters` nearest centroids. Falls back to brute force
    /// transparently when the index has not been clustered.
    pub fn search_with_clusters(
        &self,
        query: &[f32],
        top_k: usize,
        n_clusters: usize,
    ) -> Result<Vec<SearchHit>> {
        {
            let vectors = self.vectors.read();
            if query.len() != vectors.dim {
                return Err(NornicError::DimensionMismatch {
                    expected: vectors.dim,
                    got: query.len(),
                });
            }
            let clusters = self.clusters.read();
            if let Some(state) = clusters.as_ref() {
                if top_k == 0 || vectors.len() == 0 {
                    return Ok(Vec::new());
                }
                let mut q = query.to_vec();
                normalize(&mut q);

                // Rank centroids by squared distance to the query.
                let mut by_dist: Vec<(u32, f32)> = (0..state.k as u32)
                    .map(|c| (c, squared_euclidean(&q, state.centroid(c))))
                    .collect();
                by_dist.sort_by(|a, b| {
                    a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
                });

                let mut candidates: Vec<usize> = Vec::new();
                for (c, _) in by_dist.iter().take(n_clusters.max(1)) {
                    candidates.extend(&state.reverse[*c as usize]);
                }
                // Slots added since the last pass that are still
                // unassigned must stay visible.
                for (slot, a) in state.assignments.iter().enumerate() {
                    if a.is_none() {
                        candidates.push(slot);
                    }
                }
                candidates.sort_unstable();
                candidates.dedup();

                let mut scored: Vec<(usize, f32)> = candidates
                    .into_iter()
                    .filter(|&slot| slot < vectors.len())
                    .map(|slot| (slot, cosine_similarity(&q, vectors.vector(slot))))
                    .collect();
                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(top_k);

                return Ok(scored
                    .into_iter()
                    .map(|(slot, score)| SearchHit {
                        node_id: vectors.ids[slot],
                        score,
                        distance: 1.0 - score,
                    })
                    .collect());
            }
        }
        // Not clustered: transparent brute-force fallback.
        self.search(query, top_k)
    }

    /// Tier-2 maintenance: recompute the centroid of every cluster
    /// touched by queued Tier-1 moves. Returns the number of centroids
    /// recomputed.
    pub fn update_centroids_batch(&self) -> usize {
        let vectors = self.vectors.read();
        let mut clusters = self.clusters.write();
        let Some(state) = clusters.as_mut() else {
            return 0;
        };

        let mut affected: Vec<u32> = state
            .pending
            .drain(..)
            .flat_map(|p| {
                let mut v = Vec::with_capacity(2);
                if let Some(old) = p.old {
                    v.push(old);
                }
                v.push(p.new);
                v
            })
            .collect();
        affected.sort_unstable();
        affected.dedup();

        let dim = state.dim;
        let mut recomputed = 0;
        for c in affected {
            let members = &state.reverse[c as usize];
            if members.is_empty() {
                continue;
            }
            let mut sum = vec![0.0f32; dim];
            let mut count = 0usize;
            for &slot in members {
                if slot >= vectors.len() {
                    continue;
                }
                for (s, x) in sum.iter_mut().zip(vectors.vector(slot)) {
                    *s += x;
                }
                count += 1;
            }
            if count == 0 {
                continue;
            }
            let inv = 1.0 / count as f32;
            let start = c as usize * dim;
            let mut moved = 0.0f32;
            for (i, s) in sum.iter().enumerate() {
                let next = s * inv;
                let d = next - state.centroids[start + i];
                moved += d * d;
                state.centroids[start + i] = next;
            }
            state.drift = state.drift.max(moved.sqrt());
            recomputed += 1;
        }
        debug!(recomputed, drift = state.drift, "tier-2 centroid update");
        recomputed
    }

    /// Whether a full recluster is due: >10% of the index updated since
    /// the last pass, drift beyond the threshold, or the pass is stale.
    pub fn needs_recluster(&self) -> bool {
        let n = self.len().max(1);
        let clusters = self.clusters.read();
        match clusters.as_ref() {
            None => !self.is_empty(),
            Some(state) => {
                let update_fraction = state.updates_since_cluster as f64 / n as f64;
                update_fraction > self.config.recluster_update_fraction
                    || state.drift > self.config.drift_threshold
                    || state.last_clustered.elapsed() > self.config.recluster_age
            }
        }
    }

    /// Snapshot of per-node cluster assignments, if clustered.
    pub fn cluster_assignments(&self) -> Option<Vec<(nornic_core::NodeId, u32)>> {
        let vectors = self.vectors.read();
        let clusters = self.clusters.read();
        clusters.as_ref().map(|state| {
            state
                .assignments
                .iter()
                .enumerate()
                .filter_map(|(slot, a)| a.map(|c| (vectors.ids[slot], c)))
                .collect()
        })
    }

    /// Snapshot of the centroid vectors, if clustered.
    pub fn centroids(&self) -> Option<Vec<Vec<f32>>> {
        let clusters = self.clusters.read();
        clusters.as_ref().map(|state| {
            (0..state.k as u32)
                .map(|c| state.centroid(c).to_vec())
                .collect()
        })
    }

    /// Number of queued Tier-1 moves awaiting a Tier-2 pass.
    pub fn pending_updates(&self) -> usize {
        self.clusters
            .read()
            .as_ref()
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }
}

fn init_random(vectors: &Vectors, k: usize, rng: &mut impl Rng) -> Vec<f32> {
    let mut slots: Vec<usize> = (0..vectors.len()).collect();
    slots.shuffle(rng);
    let mut centroids = Vec::with_capacity(k * vectors.dim);
    for &slot in slots.iter().take(k) {
        centroids.extend_from_slice(vectors.vector(slot));
    }
    centroids
}

fn init_kmeans_pp(vectors: &Vectors, k: usize, rng: &mut impl Rng) -> Vec<f32> {
    let n = vectors.len();
    let dim = vectors.dim;
    let mut centroids = Vec::with_capacity(k * dim);

    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(vectors.vector(first));

    // Distance to the nearest already-chosen centroid, maintained
    // incrementally so init is O(nk) not O(nk^2).
    let mut min_dist: Vec<f32> = (0..n)
        .map(|slot| squared_euclidean(vectors.vector(slot), vectors.vector(first)))
        .collect();

    while centroids.len() / dim < k {
        let total: f32 = min_dist.iter().sum();
        let chosen = if total <= f32::EPSILON {
            // All remaining points coincide with chosen centroids.
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f32>() * total;
            let mut chosen = n - 1;
            for (slot, &d) in min_dist.iter().enumerate() {
                if target < d {
                    chosen = slot;
                    break;
                }
                target -= d;
            }
            chosen
        };
        centroids.extend_from_slice(vectors.vector(chosen));
        let new_centroid_start = centroids.len() - dim;
        for slot in 0..n {
            let d = squared_euclidean(
                vectors.vector(slot),
                &centroids[new_centroid_start..],
            );
            if d < min_dist[slot] {
                min_dist[slot] = d;
            }
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use nornic_core::NodeId;

    /// Three well-separated groups in 2-D.
    fn grouped_index(per_group: usize) -> VectorIndex {
        let config = KMeansConfig {
            k: Some(3),
            ..KMeansConfig::default()
        };
        let idx = VectorIndex::new(2, config);
        let anchors = [(10.0f32, 0.0f32), (0.0, 10.0), (-10.0, -10.0)];
        let mut id = 0u64;
        for (gi, (ax, ay)) in anchors.iter().enumerate() {
            for j in 0..per_group {
                let jitter = (j as f32 % 7.0) * 0.01;
                idx.add(
                    NodeId::new(id),
                    &[ax + jitter + gi as f32 * 0.001, ay + jitter],
                )
                .unwrap();
                id += 1;
            }
        }
        idx
    }

    #[test]
    fn test_auto_k_bounds() {
        assert_eq!(auto_k(1), 1);
        assert_eq!(auto_k(5), 5); // clamp(10,1000).min(5)
        assert_eq!(auto_k(200), 10); // sqrt(100)=10
        assert_eq!(auto_k(20_000), 100);
        assert_eq!(auto_k(10_000_000), 1000);
    }

    #[test]
    fn test_cluster_empty_index_errors() {
        let idx = VectorIndex::new(2, KMeansConfig::default());
        assert!(idx.cluster().is_err());
    }

    #[test]
    fn test_cluster_soundness() {
        let idx = grouped_index(30);
        idx.cluster().unwrap();

        // Every embedding's assigned cluster must be its nearest centroid.
        let centroids = idx.centroids().unwrap();
        for (node, assigned) in idx.cluster_assignments().unwrap() {
            let v = idx.get(node).unwrap();
            let mut best = 0u32;
            let mut best_d = f32::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_euclidean(&v, centroid);
                if d < best_d {
                    best_d = d;
                    best = c as u32;
                }
            }
            assert_eq!(assigned, best, "node {} misassigned", node);
        }
    }

    #[test]
    fn test_clustered_search_matches_brute_force_over_all_clusters() {
        let idx = grouped_index(40);
        let stats = idx.cluster().unwrap();

        let query = vec![9.5f32, 0.5];
        let brute = idx.search(&query, 10).unwrap();
        let clustered = idx.search_with_clusters(&query, 10, stats.k).unwrap();

        let brute_ids: Vec<_> = brute.iter().map(|h| h.node_id).collect();
        let clustered_ids: Vec<_> = clustered.iter().map(|h| h.node_id).collect();
        assert_eq!(brute_ids, clustered_ids);
    }

    #[test]
    fn test_unclustered_falls_back_to_brute_force() {
        let idx = VectorIndex::new(2, KMeansConfig::default());
        idx.add(NodeId::new(1), &[1.0, 0.0]).unwrap();
        idx.add(NodeId::new(2), &[0.0, 1.0]).unwrap();

        let hits = idx.search_with_clusters(&[1.0, 0.0], 1, 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node_id, NodeId::new(1));
    }

    #[test]
    fn test_tier1_update_queues_move() {
        let idx = grouped_index(20);
        idx.cluster().unwrap();
        assert_eq!(idx.pending_updates(), 0);

        // Move node 0 from the (10, 0) group to the (0, 10) group.
        idx.add(NodeId::new(0), &[0.1, 10.0]).unwrap();
        assert_eq!(idx.pending_updates(), 1);

        // Its new cluster's members must contain it: a clustered search
        // over that one cluster returns it among the members.
        let hits = idx.search_with_clusters(&[0.0, 1.0], 30, 1).unwrap();
        assert!(hits.iter().any(|h| h.node_id == NodeId::new(0)));
    }

    #[test]
    fn test_tier2_batch_recomputes_and_drains_queue() {
        let idx = grouped_index(20);
        idx.cluster().unwrap();
        idx.add(NodeId::new(0), &[0.1, 10.0]).unwrap();

        let recomputed = idx.update_centroids_batch();
        assert!(recomputed >= 1);
        assert_eq!(idx.pending_updates(), 0);
    }

    #[test]
    fn test_recluster_trigger_on_update_fraction() {
        let idx = grouped_index(10); // 30 nodes
        idx.cluster().unwrap();
        assert!(!idx.needs_recluster());

        // Touch > 10% of the index.
        for i in 0..4 {
            idx.add(NodeId::new(i), &[0.2, 9.0 + i as f32 * 0.1]).unwrap();
        }
        assert!(idx.needs_recluster());
    }

    #[test]
    fn test_random_init_also_converges() {
        let config = KMeansConfig {
            k: Some(2),
            init: InitMethod::Random,
            ..KMeansConfig::default()
        };
        let idx = VectorIndex::new(2, config);
        for i in 0..20 {
            let x = if i < 10 { 5.0 } else { -5.0 };
            idx.add(NodeId::new(i), &[x + (i % 3) as f32 * 0.01, 1.0])
                .unwrap();
        }
        let stats = idx.cluster().unwrap();
        assert_eq!(stats.k, 2);
        assert!(stats.iterations >= 1);
    }

    #[test]
    fn test_remove_keeps_cluster_state_consistent() {
        let idx = grouped_index(10);
        idx.cluster().unwrap();

        idx.remove(NodeId::new(0));
        idx.remove(NodeId::new(29));

        // Searches still work and never return removed nodes.
        let hits = idx.search_with_clusters(&[10.0, 0.0], 30, 3).unwrap();
        assert!(hits.iter().all(|h| h.node_id != NodeId::new(0)));
        assert!(hits.iter().all(|h| h.node_id != NodeId::new(29)));
    }

    #[test]
    fn test_k_larger_than_n_is_clamped() {
        let config = KMeansConfig {
            k: Some(64),
            ..KMeansConfig::default()
        };
        let idx = VectorIndex::new(2, config);
        for i in 0..5 {
            idx.add(NodeId::new(i), &[i as f32, 1.0]).unwrap();
        }
        let stats = idx.cluster().unwrap();
        assert_eq!(stats.k, 5);
    }
}
