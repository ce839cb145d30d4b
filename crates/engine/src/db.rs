//! The `GraphDb` coordinator
//!
//! Open sequence: load (or bootstrap) `nornicdb.toml`, recover the
//! latest snapshot plus the WAL tail, wire the storage engine to the
//! WAL (direct or write-behind), reload inference state from `state/`,
//! start the replication runtime for the configured mode, and construct
//! the vector index, temporal tracker, and optional authenticator
//! around it. Every mutation passes the replication write gate first
//! and hands its WAL tail to the runtime afterwards.

use crate::config::GraphDbConfig;
use crate::replication::ReplicationRuntime;
use nornic_auth::Authenticator;
use nornic_core::{
    CancelToken, Direction, Edge, Node, NodeId, NornicError, PropertyMap, Result, Value,
};
use nornic_durability::{recover, SnapshotStore, Wal, WriteBehind};
use nornic_inference::{Decision, EdgeSuggestion, InferenceEngine, DecaySweepStats};
use nornic_search::{rrf_fuse, FusedHit, RankedList, RrfConfig, WeightProfile};
use nornic_storage::{GraphStore, LabelScan};
use nornic_temporal::{AccessTracker, Prediction};
use nornic_vector::{CachedEmbedder, Embedder, SearchHit, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The assembled database core.
pub struct GraphDb {
    dir: PathBuf,
    config: GraphDbConfig,
    store: Arc<GraphStore>,
    snapshots: SnapshotStore,
    wal: Arc<Wal>,
    write_behind: Option<Arc<WriteBehind>>,
    vectors: Arc<VectorIndex>,
    tracker: Arc<AccessTracker>,
    inference: Arc<InferenceEngine>,
    replication: ReplicationRuntime,
    auth: Option<Arc<Authenticator>>,
    /// Mutations since the last automatic snapshot.
    writes_since_snapshot: AtomicU64,
}

impl GraphDb {
    /// Open (or create) a database at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let config = GraphDbConfig::load_or_create(&dir)?;
        Self::open_with_config(dir, config)
    }

    /// Open with an explicit config (bypasses `nornicdb.toml`).
    pub fn open_with_config(dir: PathBuf, config: GraphDbConfig) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let sync_mode = config.durability.parse_sync_mode()?;

        // Recover: newest readable snapshot, then the WAL tail.
        let recovered = recover(&dir, sync_mode)?;
        let snapshots = SnapshotStore::open(&dir)?;
        let wal = Arc::clone(&recovered.wal);

        let (store, write_behind) = if config.durability.async_writes {
            let wb = WriteBehind::start(
                Arc::clone(&wal),
                Duration::from_millis(config.durability.write_behind_interval_ms),
            );
            (GraphStore::with_write_behind(Arc::clone(&wb)), Some(wb))
        } else {
            (GraphStore::with_wal(Arc::clone(&wal)), None)
        };

        if let Some(snapshot) = &recovered.snapshot {
            store.load_snapshot(snapshot)?;
        }
        for entry in &recovered.tail {
            store.apply_entry(entry)?;
        }
        info!(
            nodes = store.stats().node_count,
            edges = store.stats().edge_count,
            replayed = recovered.tail.len(),
            "storage recovered"
        );

        let vectors = Arc::new(VectorIndex::new(
            config.vector.dimension,
            config.vector.resolve()?,
        ));
        let tracker = Arc::new(AccessTracker::new(config.temporal.resolve()));
        let inference = Arc::new(InferenceEngine::open(
            Arc::clone(&store),
            config.inference.resolve(),
            &dir,
        )?);

        // Replication joins after recovery so shipped/committed entries
        // land on the recovered state, not under it.
        let replication = ReplicationRuntime::start(
            config.replication.resolve()?,
            Arc::clone(&store),
            Arc::clone(&wal),
        )?;

        let auth = if config.auth.enabled {
            Some(Arc::new(Authenticator::new(
                config.auth.jwt_secret.as_bytes().to_vec(),
                config.auth.resolve(),
            )?))
        } else {
            None
        };

        Ok(GraphDb {
            dir,
            config,
            store,
            snapshots,
            wal,
            write_behind,
            vectors,
            tracker,
            inference,
            replication,
            auth,
            writes_since_snapshot: AtomicU64::new(0),
        })
    }

    // =========================================================================
    // Component access
    // =========================================================================

    /// Data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active configuration.
    pub fn config(&self) -> &GraphDbConfig {
        &self.config
    }

    /// The storage engine.
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// The vector index.
    pub fn vectors(&self) -> &Arc<VectorIndex> {
        &self.vectors
    }

    /// The temporal tracker.
    pub fn tracker(&self) -> &Arc<AccessTracker> {
        &self.tracker
    }

    /// The inference engine (gate stores included).
    pub fn inference(&self) -> &Arc<InferenceEngine> {
        &self.inference
    }

    /// The replication runtime: mode, cluster address, leader identity,
    /// and the cross-region conflict drain.
    pub fn replication(&self) -> &ReplicationRuntime {
        &self.replication
    }

    /// The authenticator, when `[auth].enabled`.
    pub fn auth(&self) -> Option<&Arc<Authenticator>> {
        self.auth.as_ref()
    }

    /// Whether mutations return before they are durable.
    pub fn async_writes(&self) -> bool {
        self.write_behind.is_some()
    }

    // =========================================================================
    // Storage surface
    // =========================================================================

    /// Create a node.
    pub fn put_node(&self, labels: Vec<String>, properties: PropertyMap) -> Result<NodeId> {
        self.replication.check_writable()?;
        let id = self.store.put_node(labels, properties)?;
        self.note_write()?;
        Ok(id)
    }

    /// Fetch a node, recording the access for temporal tracking.
    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        let node = self.store.get_node(id)?;
        self.tracker.record_access_now(id);
        Ok(node)
    }

    /// Create an edge; both endpoints must exist.
    pub fn put_edge(
        &self,
        src: NodeId,
        dst: NodeId,
        label: impl Into<String>,
        properties: PropertyMap,
    ) -> Result<nornic_core::EdgeId> {
        self.replication.check_writable()?;
        let id = self.store.put_edge(src, dst, label, properties)?;
        self.note_write()?;
        Ok(id)
    }

    /// Fetch an edge.
    pub fn get_edge(&self, id: nornic_core::EdgeId) -> Result<Edge> {
        self.store.get_edge(id)
    }

    /// Set one property on a node.
    pub fn set_property(&self, id: NodeId, key: impl Into<String>, value: Value) -> Result<()> {
        self.replication.check_writable()?;
        self.store.set_property(id, key, value)?;
        self.note_write()?;
        Ok(())
    }

    /// Delete a node, cascading incident edges and evicting its
    /// embedding and access tracker.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        self.replication.check_writable()?;
        self.store.delete_node(id)?;
        self.vectors.remove(id);
        self.tracker.forget(id);
        self.note_write()?;
        Ok(())
    }

    /// Delete an edge.
    pub fn delete_edge(&self, id: nornic_core::EdgeId) -> Result<()> {
        self.replication.check_writable()?;
        self.store.delete_edge(id)?;
        self.note_write()?;
        Ok(())
    }

    /// Edges incident to a node.
    pub fn list_edges(
        &self,
        node: NodeId,
        direction: Direction,
        label: Option<&str>,
    ) -> Vec<Edge> {
        self.store.list_edges(node, direction, label)
    }

    /// Lazy, restartable scan of all nodes with a label.
    pub fn scan(&self, label: impl Into<String>) -> LabelScan {
        LabelScan::new(Arc::clone(&self.store), label)
    }

    fn note_write(&self) -> Result<()> {
        // Replication first: the standby/followers see the tail before
        // any snapshot claims to cover it.
        self.replication.after_local_write()?;

        let every = self.config.durability.snapshot_every_entries;
        if every == 0 {
            return Ok(());
        }
        let writes = self.writes_since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        if writes >= every {
            self.writes_since_snapshot.store(0, Ordering::Relaxed);
            if let Err(e) = self.snapshot() {
                tracing::warn!(error = %e, "automatic snapshot failed");
            }
        }
        Ok(())
    }

    /// Take a snapshot now, pruning old ones.
    pub fn snapshot(&self) -> Result<u64> {
        // Everything buffered must be durable before the snapshot claims
        // to cover it.
        if let Some(wb) = &self.write_behind {
            wb.drain()?;
        } else {
            self.wal.sync()?;
        }
        let (mut seq, payload) = self.store.snapshot_bytes()?;
        if self.write_behind.is_some() {
            // Buffered mutations carry no sequence in memory; after the
            // drain, everything up to the WAL head is in this snapshot.
            seq = self.wal.next_seq().saturating_sub(1);
        }
        self.snapshots.write(seq, &payload)?;
        self.snapshots.prune(2)?;
        debug!(seq, "snapshot taken");
        Ok(seq)
    }

    // =========================================================================
    // Vector surface
    // =========================================================================

    /// Register (or overwrite) a node's embedding. Dimension-checked.
    pub fn add_embedding(&self, node: NodeId, vector: &[f32]) -> Result<()> {
        if !self.store.node_exists(node) {
            return Err(NornicError::NodeNotFound { id: node });
        }
        self.vectors.add(node, vector)
    }

    /// Embed `text` through the (cached) embedder and index it for the
    /// node. Observes the cancel token before the embedder call.
    pub fn embed_and_index<E: Embedder>(
        &self,
        embedder: &CachedEmbedder<E>,
        node: NodeId,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check("embed")?;
        let vector = embedder.embed(text)?;
        cancel.check("index embedding")?;
        self.add_embedding(node, &vector)
    }

    /// Wrap an embedder with this database's configured cache size.
    pub fn cached_embedder<E: Embedder>(&self, embedder: E) -> CachedEmbedder<E> {
        CachedEmbedder::new(embedder, self.config.cache.entries)
    }

    /// Brute-force vector search.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let hits = self.vectors.search(query, top_k)?;
        for hit in &hits {
            self.tracker.record_access_now(hit.node_id);
        }
        Ok(hits)
    }

    /// Cluster-accelerated search (transparent brute-force fallback).
    pub fn search_with_clusters(
        &self,
        query: &[f32],
        top_k: usize,
        n_clusters: usize,
    ) -> Result<Vec<SearchHit>> {
        let hits = self.vectors.search_with_clusters(query, top_k, n_clusters)?;
        for hit in &hits {
            self.tracker.record_access_now(hit.node_id);
        }
        Ok(hits)
    }

    /// Hybrid retrieval: fuse this database's vector hits with an
    /// external lexical ranking, weighting by query length.
    pub fn hybrid_search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        lexical_ranking: Vec<NodeId>,
        top_k: usize,
    ) -> Result<Vec<FusedHit>> {
        let profile = WeightProfile::for_query(query_text);
        let vector_hits = self.vectors.search(query_vector, top_k.max(16))?;
        let lists = vec![
            RankedList::new(
                "vector",
                profile.vector,
                vector_hits.into_iter().map(|h| h.node_id).collect(),
            ),
            RankedList::new("lexical", profile.lexical, lexical_ranking),
        ];
        let mut fused = rrf_fuse(&lists, &RrfConfig::default());
        fused.truncate(top_k);
        Ok(fused)
    }

    // =========================================================================
    // Inference surface
    // =========================================================================

    /// Route a suggestion through the inference gates. Materialization
    /// writes through storage, so the replication write gate applies.
    pub fn suggest(&self, suggestion: EdgeSuggestion) -> Result<Decision> {
        self.replication.check_writable()?;
        let decision = self.inference.process_suggestion(suggestion)?;
        if decision.materialize {
            self.note_write()?;
        }
        Ok(decision)
    }

    /// Next-access prediction for a node.
    pub fn predict_next_access(&self, node: NodeId) -> Option<Prediction> {
        self.tracker.predict_next_access(node)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// One maintenance pass: decay sweep, Tier-2 centroid refresh, and a
    /// full recluster when the index asks for one.
    pub fn maintain(&self) -> Result<DecaySweepStats> {
        let stats = self.inference.decay_sweep()?;
        self.vectors.update_centroids_batch();
        if self.vectors.needs_recluster() && self.vectors.len() > 0 {
            self.vectors.cluster()?;
        }
        Ok(stats)
    }

    /// Flush, snapshot, and stop background work. Called on shutdown;
    /// dropping without closing loses nothing durable beyond the
    /// configured sync mode's window.
    pub fn close(&self) -> Result<()> {
        self.replication.shutdown();
        if let Some(wb) = &self.write_behind {
            wb.stop();
        }
        self.wal.sync()?;
        self.snapshot()?;
        info!("database closed");
        Ok(())
    }
}
