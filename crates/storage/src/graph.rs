//! The in-memory graph with WAL-first mutations

use nornic_core::{
    now_millis, Direction, Edge, EdgeId, Node, NodeId, NornicError, PropertyMap, Result,
    SignalType, Value,
};
use nornic_durability::{Wal, WalEntry, WalOp, WriteBehind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// How mutations reach the durability layer.
enum DurabilityPath {
    /// Synchronous append; the configured sync mode decides fsync timing.
    Direct(Arc<Wal>),
    /// Async write-behind; mutations are "accepted, not yet durable".
    Buffered(Arc<WriteBehind>),
    /// No logging. Used by recovery replay and by replicas applying a
    /// remote log (the remote leader already persisted the entry).
    None,
}

#[derive(Default, Serialize, Deserialize)]
struct GraphState {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    next_node_id: u64,
    next_edge_id: u64,
    applied_seq: u64,
}

struct GraphInner {
    state: GraphState,
    // Rebuilt from `state` on load; never serialized.
    out_adj: FxHashMap<NodeId, Vec<EdgeId>>,
    in_adj: FxHashMap<NodeId, Vec<EdgeId>>,
    label_index: BTreeMap<String, BTreeSet<NodeId>>,
}

impl GraphInner {
    fn rebuild_indexes(&mut self) {
        self.out_adj.clear();
        self.in_adj.clear();
        self.label_index.clear();
        let edges: Vec<(EdgeId, NodeId, NodeId)> = self
            .state
            .edges
            .values()
            .map(|e| (e.id, e.src, e.dst))
            .collect();
        for (id, src, dst) in edges {
            self.out_adj.entry(src).or_default().push(id);
            self.in_adj.entry(dst).or_default().push(id);
        }
        for node in self.state.nodes.values() {
            for label in &node.labels {
                self.label_index
                    .entry(label.clone())
                    .or_default()
                    .insert(node.id);
            }
        }
    }

    fn unlink_edge(&mut self, edge: &Edge) {
        if let Some(ids) = self.out_adj.get_mut(&edge.src) {
            ids.retain(|id| *id != edge.id);
        }
        if let Some(ids) = self.in_adj.get_mut(&edge.dst) {
            ids.retain(|id| *id != edge.id);
        }
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Live node count.
    pub node_count: usize,
    /// Live (non-archived) edge count.
    pub edge_count: usize,
    /// Archived edge count.
    pub archived_edge_count: usize,
    /// Last applied WAL sequence number.
    pub applied_seq: u64,
}

/// The graph storage engine.
pub struct GraphStore {
    inner: RwLock<GraphInner>,
    durability: DurabilityPath,
}

impl GraphStore {
    /// An ephemeral store with no durability. Used in tests and by
    /// replicas that apply a remote log.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(GraphStore {
            inner: RwLock::new(GraphInner {
                state: GraphState::default(),
                out_adj: FxHashMap::default(),
                in_adj: FxHashMap::default(),
                label_index: BTreeMap::new(),
            }),
            durability: DurabilityPath::None,
        })
    }

    /// A store logging synchronously through the given WAL.
    pub fn with_wal(wal: Arc<Wal>) -> Arc<Self> {
        Arc::new(GraphStore {
            inner: RwLock::new(GraphInner {
                state: GraphState::default(),
                out_adj: FxHashMap::default(),
                in_adj: FxHashMap::default(),
                label_index: BTreeMap::new(),
            }),
            durability: DurabilityPath::Direct(wal),
        })
    }

    /// A store logging through an async write-behind buffer.
    pub fn with_write_behind(wb: Arc<WriteBehind>) -> Arc<Self> {
        Arc::new(GraphStore {
            inner: RwLock::new(GraphInner {
                state: GraphState::default(),
                out_adj: FxHashMap::default(),
                in_adj: FxHashMap::default(),
                label_index: BTreeMap::new(),
            }),
            durability: DurabilityPath::Buffered(wb),
        })
    }

    // =========================================================================
    // Durability plumbing
    // =========================================================================

    /// Record the op durably. Returns the assigned WAL sequence when the
    /// path is synchronous; buffered and ephemeral paths return `None`
    /// (the flusher assigns sequences later).
    fn log(&self, op: WalOp) -> Result<Option<u64>> {
        match &self.durability {
            DurabilityPath::Direct(wal) => Ok(Some(wal.append(op)?)),
            DurabilityPath::Buffered(wb) => {
                wb.enqueue(op)?;
                Ok(None)
            }
            DurabilityPath::None => Ok(None),
        }
    }

    fn log_and_apply(&self, inner: &mut GraphInner, op: WalOp) -> Result<()> {
        let seq = self.log(op.clone())?;
        Self::apply_op(inner, &op);
        if let Some(seq) = seq {
            inner.state.applied_seq = seq;
        }
        Ok(())
    }

    /// Restore state from a snapshot payload produced by
    /// [`GraphStore::snapshot_bytes`].
    pub fn load_snapshot(&self, payload: &[u8]) -> Result<()> {
        let state: GraphState = bincode::deserialize(payload)?;
        let mut inner = self.inner.write();
        inner.state = state;
        inner.rebuild_indexes();
        info!(
            nodes = inner.state.nodes.len(),
            edges = inner.state.edges.len(),
            "snapshot restored"
        );
        Ok(())
    }

    /// Serialize current state for a snapshot, together with the sequence
    /// number it covers.
    pub fn snapshot_bytes(&self) -> Result<(u64, Vec<u8>)> {
        let inner = self.inner.read();
        let payload = bincode::serialize(&inner.state)?;
        Ok((inner.state.applied_seq, payload))
    }

    /// Apply a recovered or replicated WAL entry without re-logging it.
    ///
    /// Idempotent for entries at or below the applied sequence number.
    pub fn apply_entry(&self, entry: &WalEntry) -> Result<()> {
        let mut inner = self.inner.write();
        if entry.seq != 0 && entry.seq <= inner.state.applied_seq {
            return Ok(());
        }
        Self::apply_op(&mut inner, &entry.op);
        if entry.seq != 0 {
            inner.state.applied_seq = entry.seq;
        }
        Ok(())
    }

    fn apply_op(inner: &mut GraphInner, op: &WalOp) {
        match op {
            WalOp::CreateNode {
                id,
                labels,
                properties,
            } => {
                let node = Node::new(*id, labels.clone(), properties.clone());
                for label in &node.labels {
                    inner
                        .label_index
                        .entry(label.clone())
                        .or_default()
                        .insert(*id);
                }
                inner.state.nodes.insert(*id, node);
                if id.as_u64() >= inner.state.next_node_id {
                    inner.state.next_node_id = id.as_u64() + 1;
                }
            }
            WalOp::DeleteNode { id } => {
                if let Some(node) = inner.state.nodes.remove(id) {
                    for label in &node.labels {
                        if let Some(set) = inner.label_index.get_mut(label) {
                            set.remove(id);
                        }
                    }
                }
                // Cascade incident edges via the id-keyed adjacency index.
                let mut incident: Vec<EdgeId> = Vec::new();
                incident.extend(inner.out_adj.remove(id).unwrap_or_default());
                incident.extend(inner.in_adj.remove(id).unwrap_or_default());
                incident.sort_unstable();
                incident.dedup();
                for edge_id in incident {
                    if let Some(edge) = inner.state.edges.remove(&edge_id) {
                        inner.unlink_edge(&edge);
                    }
                }
            }
            WalOp::SetProperty { id, key, value } => {
                if let Some(node) = inner.state.nodes.get_mut(id) {
                    node.properties.insert(key.clone(), value.clone());
                    node.updated_at = now_millis();
                }
            }
            WalOp::CreateEdge {
                id,
                label,
                src,
                dst,
                properties,
                score,
                signal,
            } => {
                let edge = Edge::new(*id, label.clone(), *src, *dst)
                    .with_properties(properties.clone())
                    .with_score(*score)
                    .with_signal(signal.clone());
                inner.out_adj.entry(*src).or_default().push(*id);
                inner.in_adj.entry(*dst).or_default().push(*id);
                inner.state.edges.insert(*id, edge);
                if id.as_u64() >= inner.state.next_edge_id {
                    inner.state.next_edge_id = id.as_u64() + 1;
                }
            }
            WalOp::DeleteEdge { id } => {
                if let Some(edge) = inner.state.edges.remove(id) {
                    inner.unlink_edge(&edge);
                }
            }
        }
    }

    // =========================================================================
    // Mutations (WAL-first)
    // =========================================================================

    /// Create a node, returning its assigned id.
    pub fn put_node(&self, labels: Vec<String>, properties: PropertyMap) -> Result<NodeId> {
        let mut seen = BTreeSet::new();
        for label in &labels {
            if label.is_empty() {
                return Err(NornicError::invalid_input("empty node label"));
            }
            if !seen.insert(label) {
                return Err(NornicError::invalid_input(format!(
                    "duplicate node label {:?}",
                    label
                )));
            }
        }

        let mut inner = self.inner.write();
        let id = NodeId::new(inner.state.next_node_id);
        inner.state.next_node_id += 1;

        let op = WalOp::CreateNode {
            id,
            labels,
            properties,
        };
        self.log_and_apply(&mut inner, op)?;
        Ok(id)
    }

    /// Create an edge between two existing nodes.
    pub fn put_edge(
        &self,
        src: NodeId,
        dst: NodeId,
        label: impl Into<String>,
        properties: PropertyMap,
    ) -> Result<EdgeId> {
        self.put_edge_scored(src, dst, label, properties, 1.0, SignalType::Custom(
            "application".to_string(),
        ))
    }

    /// Create an edge with an explicit score and signal classification.
    /// This is the path the inference engine materializes through.
    pub fn put_edge_scored(
        &self,
        src: NodeId,
        dst: NodeId,
        label: impl Into<String>,
        properties: PropertyMap,
        score: f64,
        signal: SignalType,
    ) -> Result<EdgeId> {
        let label = label.into();
        if label.is_empty() {
            return Err(NornicError::invalid_input("empty edge label"));
        }

        let mut inner = self.inner.write();
        if !inner.state.nodes.contains_key(&src) {
            return Err(NornicError::NodeNotFound { id: src });
        }
        if !inner.state.nodes.contains_key(&dst) {
            return Err(NornicError::NodeNotFound { id: dst });
        }

        let id = EdgeId::new(inner.state.next_edge_id);
        inner.state.next_edge_id += 1;

        let op = WalOp::CreateEdge {
            id,
            label,
            src,
            dst,
            properties,
            score: score.clamp(0.0, 1.0),
            signal,
        };
        self.log_and_apply(&mut inner, op)?;
        Ok(id)
    }

    /// Set one property on a node.
    pub fn set_property(&self, id: NodeId, key: impl Into<String>, value: Value) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.state.nodes.contains_key(&id) {
            return Err(NornicError::NodeNotFound { id });
        }
        let op = WalOp::SetProperty {
            id,
            key: key.into(),
            value,
        };
        self.log_and_apply(&mut inner, op)?;
        Ok(())
    }

    /// Delete a node, cascading its incident edges. Also the GDPR erasure
    /// path: after it returns, no query reports the node or its edges.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.state.nodes.contains_key(&id) {
            return Err(NornicError::NodeNotFound { id });
        }
        let op = WalOp::DeleteNode { id };
        self.log_and_apply(&mut inner, op)?;
        debug!(node = %id, "node deleted with cascade");
        Ok(())
    }

    /// Delete a single edge.
    pub fn delete_edge(&self, id: EdgeId) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.state.edges.contains_key(&id) {
            return Err(NornicError::EdgeNotFound { id });
        }
        let op = WalOp::DeleteEdge { id };
        self.log_and_apply(&mut inner, op)?;
        Ok(())
    }

    // =========================================================================
    // In-place edge maintenance (decay sweep, re-materialization)
    // =========================================================================

    /// Multiply an edge's score by `factor`, archiving it when the result
    /// falls below `archive_threshold`. Returns the new score.
    ///
    /// Durability for decayed scores comes from the next snapshot; the
    /// decay sweep is deliberately not WAL-amplified.
    pub fn decay_edge(&self, id: EdgeId, factor: f64, archive_threshold: f64) -> Result<f64> {
        let mut inner = self.inner.write();
        let edge = inner
            .state
            .edges
            .get_mut(&id)
            .ok_or(NornicError::EdgeNotFound { id })?;
        edge.score = (edge.score * factor).clamp(0.0, 1.0);
        if edge.score < archive_threshold {
            edge.archived = true;
        }
        Ok(edge.score)
    }

    /// Refresh an edge the inference path re-materialized: bump its score
    /// to at least `score`, un-archive it, stamp `last_materialized_at`.
    pub fn touch_materialized(&self, id: EdgeId, score: f64) -> Result<()> {
        let mut inner = self.inner.write();
        let edge = inner
            .state
            .edges
            .get_mut(&id)
            .ok_or(NornicError::EdgeNotFound { id })?;
        edge.score = edge.score.max(score.clamp(0.0, 1.0));
        edge.archived = false;
        edge.last_materialized_at = now_millis();
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch a node by id.
    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        self.inner
            .read()
            .state
            .nodes
            .get(&id)
            .cloned()
            .ok_or(NornicError::NodeNotFound { id })
    }

    /// Fetch an edge by id. Archived edges are still fetchable by id.
    pub fn get_edge(&self, id: EdgeId) -> Result<Edge> {
        self.inner
            .read()
            .state
            .edges
            .get(&id)
            .cloned()
            .ok_or(NornicError::EdgeNotFound { id })
    }

    /// Whether a node exists.
    pub fn node_exists(&self, id: NodeId) -> bool {
        self.inner.read().state.nodes.contains_key(&id)
    }

    /// Edges incident to `node` in the given direction, optionally
    /// filtered by label. Archived edges are excluded.
    pub fn list_edges(
        &self,
        node: NodeId,
        direction: Direction,
        label: Option<&str>,
    ) -> Vec<Edge> {
        let inner = self.inner.read();
        let mut ids: Vec<EdgeId> = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            ids.extend(inner.out_adj.get(&node).into_iter().flatten());
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            ids.extend(inner.in_adj.get(&node).into_iter().flatten());
        }
        ids.sort_unstable();
        ids.dedup();

        ids.into_iter()
            .filter_map(|id| inner.state.edges.get(&id))
            .filter(|e| !e.archived)
            .filter(|e| label.map_or(true, |l| e.label == l))
            .cloned()
            .collect()
    }

    /// Find a live edge by its (src, dst, label) triple.
    pub fn find_edge(&self, src: NodeId, dst: NodeId, label: &str) -> Option<Edge> {
        let inner = self.inner.read();
        inner
            .out_adj
            .get(&src)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.state.edges.get(id))
            .find(|e| e.dst == dst && e.label == label && !e.archived)
            .cloned()
    }

    /// Degree counts for a node: (incoming, outgoing), live edges only.
    pub fn degrees(&self, node: NodeId) -> (usize, usize) {
        let inner = self.inner.read();
        let count_live = |ids: Option<&Vec<EdgeId>>| {
            ids.into_iter()
                .flatten()
                .filter(|id| {
                    inner
                        .state
                        .edges
                        .get(id)
                        .map(|e| !e.archived)
                        .unwrap_or(false)
                })
                .count()
        };
        (
            count_live(inner.in_adj.get(&node)),
            count_live(inner.out_adj.get(&node)),
        )
    }

    /// Page of node ids carrying `label`, strictly after `cursor`, in
    /// ascending id order. Backs the restartable label scan.
    pub(crate) fn scan_page(
        &self,
        label: &str,
        cursor: Option<NodeId>,
        limit: usize,
    ) -> Vec<NodeId> {
        let inner = self.inner.read();
        let Some(set) = inner.label_index.get(label) else {
            return Vec::new();
        };
        let iter: Box<dyn Iterator<Item = &NodeId>> = match cursor {
            Some(c) => Box::new(set.range((
                std::ops::Bound::Excluded(c),
                std::ops::Bound::Unbounded,
            ))),
            None => Box::new(set.iter()),
        };
        iter.take(limit).copied().collect()
    }

    /// All live edge ids. Used by the decay sweep.
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        let inner = self.inner.read();
        inner
            .state
            .edges
            .values()
            .filter(|e| !e.archived)
            .map(|e| e.id)
            .collect()
    }

    /// Observability counters.
    pub fn stats(&self) -> GraphStats {
        let inner = self.inner.read();
        let archived = inner.state.edges.values().filter(|e| e.archived).count();
        GraphStats {
            node_count: inner.state.nodes.len(),
            edge_count: inner.state.edges.len() - archived,
            archived_edge_count: archived,
            applied_seq: inner.state.applied_seq,
        }
    }
}
