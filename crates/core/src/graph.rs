//! Graph records: nodes and edges
//!
//! Records are owned by the storage engine and reference each other by id
//! only. An edge's endpoints must exist when the edge is created; deleting
//! a node cascades deletion of its incident edges.

use crate::types::{now_millis, EdgeId, NodeId, SignalType, TimestampMillis};
use crate::value::{PropertyMap, Value};
use serde::{Deserialize, Serialize};

/// A labeled property node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier, allocated by the storage engine.
    pub id: NodeId,
    /// Ordered set of labels. Duplicates are rejected on ingest.
    pub labels: Vec<String>,
    /// Property mapping.
    pub properties: PropertyMap,
    /// Creation timestamp (ms epoch).
    pub created_at: TimestampMillis,
    /// Last-update timestamp (ms epoch).
    pub updated_at: TimestampMillis,
    /// Whether an embedding is registered for this node in the vector index.
    pub has_embedding: bool,
}

impl Node {
    /// Create a node record with fresh timestamps.
    pub fn new(id: NodeId, labels: Vec<String>, properties: PropertyMap) -> Self {
        let now = now_millis();
        Node {
            id,
            labels,
            properties,
            created_at: now,
            updated_at: now,
            has_embedding: false,
        }
    }

    /// Whether the node carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Property accessor.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A typed, directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier, allocated by the storage engine.
    pub id: EdgeId,
    /// Relationship label (type).
    pub label: String,
    /// Source node id. Must exist at creation time.
    pub src: NodeId,
    /// Target node id. Must exist at creation time.
    pub dst: NodeId,
    /// Whether traversal semantics treat the edge as directed.
    pub directed: bool,
    /// Property mapping.
    pub properties: PropertyMap,
    /// Importance/confidence score in `[0, 1]`. Decay multiplies this down.
    pub score: f64,
    /// Where the relationship came from.
    pub signal: SignalType,
    /// Creation timestamp (ms epoch).
    pub created_at: TimestampMillis,
    /// Last time the inference path (re-)materialized this edge (ms epoch).
    pub last_materialized_at: TimestampMillis,
    /// Soft-delete flag set by the decay sweep when the score falls below
    /// the archive threshold. Archived edges are excluded from queries.
    pub archived: bool,
}

impl Edge {
    /// Create an edge record with fresh timestamps.
    pub fn new(id: EdgeId, label: impl Into<String>, src: NodeId, dst: NodeId) -> Self {
        let now = now_millis();
        Edge {
            id,
            label: label.into(),
            src,
            dst,
            directed: true,
            properties: PropertyMap::new(),
            score: 1.0,
            signal: SignalType::Custom("application".to_string()),
            created_at: now,
            last_materialized_at: now,
            archived: false,
        }
    }

    /// Builder: set the score, clamped into `[0, 1]`.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    /// Builder: set the signal type.
    pub fn with_signal(mut self, signal: SignalType) -> Self {
        self.signal = signal;
        self
    }

    /// Builder: set the property map.
    pub fn with_properties(mut self, properties: PropertyMap) -> Self {
        self.properties = properties;
        self
    }

    /// Whether this edge touches the given node.
    pub fn touches(&self, node: NodeId) -> bool {
        self.src == node || self.dst == node
    }
}
