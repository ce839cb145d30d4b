//! Vector index scenarios: round trip, cluster soundness, and the
//! brute-force equivalence of cluster-accelerated search when every
//! cluster is probed.

use nornicdb::{InitMethod, KMeansConfig, NodeId, VectorIndex};

const DIM: usize = 8;

// The modulus is prime and larger than any id used here, so distinct
// ids always produce distinct vectors (no accidental exact-match ties).
fn seeded_vector(i: u64) -> Vec<f32> {
    (0..DIM)
        .map(|j| (((i * 1_000_003 + j as u64 * 7_919) % 104_729) as f32 / 52_364.5) - 1.0)
        .collect()
}

fn build_index(n: u64, k: usize) -> VectorIndex {
    let config = KMeansConfig {
        k: Some(k),
        init: InitMethod::KMeansPlusPlus,
        max_iterations: 10,
        ..KMeansConfig::default()
    };
    let index = VectorIndex::new(DIM, config);
    for i in 0..n {
        index.add(NodeId::new(i), &seeded_vector(i)).unwrap();
    }
    index
}

/// After `add(id, v)`, `search(v, 1)` returns `id` with score ≈ 1.
#[test]
fn round_trip_top_hit() {
    let index = build_index(1_000, 16);
    for probe in [0u64, 137, 999] {
        let hits = index.search(&seeded_vector(probe), 1).unwrap();
        assert_eq!(hits[0].node_id, NodeId::new(probe));
        assert!(hits[0].score >= 1.0 - 1e-4, "score {}", hits[0].score);
        assert!(hits[0].distance <= 1e-4);
    }
}

/// Searching all clusters is equivalent to brute force on a
/// 10,000-vector index.
#[test]
fn cluster_search_over_all_clusters_matches_brute_force() {
    let index = build_index(10_000, 16);
    let stats = index.cluster().unwrap();
    assert_eq!(stats.k, 16);

    for probe in [3u64, 4_242, 9_999] {
        let query = seeded_vector(probe);
        let brute: Vec<NodeId> = index
            .search(&query, 10)
            .unwrap()
            .into_iter()
            .map(|h| h.node_id)
            .collect();
        let clustered: Vec<NodeId> = index
            .search_with_clusters(&query, 10, stats.k)
            .unwrap()
            .into_iter()
            .map(|h| h.node_id)
            .collect();
        assert_eq!(brute, clustered, "probe {}", probe);
    }
}

/// Every embedding's assigned cluster has minimal squared-Euclidean
/// distance to its centroid among all centroids.
#[test]
fn cluster_assignments_are_sound() {
    let index = build_index(2_000, 12);
    index.cluster().unwrap();

    let centroids = index.centroids().unwrap();
    for (node, assigned) in index.cluster_assignments().unwrap() {
        let v = index.get(node).unwrap();
        let dist = |c: &[f32]| -> f32 {
            c.iter().zip(&v).map(|(a, b)| (a - b) * (a - b)).sum()
        };
        let assigned_dist = dist(&centroids[assigned as usize]);
        for centroid in &centroids {
            assert!(
                assigned_dist <= dist(centroid) + 1e-5,
                "node {} not assigned to nearest centroid",
                node
            );
        }
    }
}

/// Probing fewer clusters still finds the exact-match neighbor (it lives
/// in the nearest cluster by construction).
#[test]
fn accelerated_search_with_few_probes_finds_exact_match() {
    let index = build_index(5_000, 20);
    index.cluster().unwrap();

    let query = seeded_vector(1_234);
    let hits = index.search_with_clusters(&query, 1, 2).unwrap();
    assert_eq!(hits[0].node_id, NodeId::new(1_234));
}

/// Unclustered accelerated search falls back to brute force without an
/// error surfacing.
#[test]
fn unclustered_falls_back_transparently() {
    let index = build_index(100, 8);
    let query = seeded_vector(42);
    let accelerated = index.search_with_clusters(&query, 5, 4).unwrap();
    let brute = index.search(&query, 5).unwrap();
    assert_eq!(accelerated, brute);
}

/// Online updates: a moved vector is findable through the clustered
/// path immediately, and Tier-2 refresh drains the pending queue.
#[test]
fn online_update_visibility() {
    let index = build_index(1_000, 10);
    index.cluster().unwrap();

    let moved = NodeId::new(7);
    let target = seeded_vector(900);
    index.add(moved, &target).unwrap();

    let hits = index.search_with_clusters(&target, 2, 1).unwrap();
    assert!(
        hits.iter().any(|h| h.node_id == moved),
        "moved vector invisible to clustered search"
    );

    assert!(index.pending_updates() > 0);
    index.update_centroids_batch();
    assert_eq!(index.pending_updates(), 0);
}
