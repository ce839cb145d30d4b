//! Identifier and classification types shared across the system
//!
//! Ids are plain `u64` newtypes. The graph is cyclic by nature, so records
//! reference each other by id only; nothing in the system holds a direct
//! pointer to another record (deletion cascades walk id-keyed indexes).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
///
/// Wall-clock timestamps are used for record metadata and provenance.
/// Anything that gates behavior (cooldowns, election timeouts) uses
/// monotonic `Instant`s instead and never trusts this type.
pub type TimestampMillis = i64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> TimestampMillis {
    chrono::Utc::now().timestamp_millis()
}

/// Unique identifier for a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Wrap a raw id value.
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Unique identifier for an edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EdgeId(pub u64);

impl EdgeId {
    /// Wrap a raw id value.
    pub fn new(id: u64) -> Self {
        EdgeId(id)
    }

    /// Raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Session identifier attached to evidence signals and provenance records.
///
/// Sessions are opaque strings supplied by the caller (typically a client
/// connection or agent run id). Distinct-session counting drives the
/// evidence gate.
pub type SessionId = String;

/// Edge traversal direction for adjacency queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Edges whose source is the queried node.
    Outgoing,
    /// Edges whose target is the queried node.
    Incoming,
    /// Both directions.
    Both,
}

/// Signal classification for an edge: where the relationship came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Nodes accessed together within a session window.
    Coaccess,
    /// Embedding-space similarity.
    Similarity,
    /// Graph-topology inference (shared neighbors, triangles).
    Topology,
    /// Suggested by an external language model.
    LlmInfer,
    /// Application-supplied signal name.
    Custom(String),
}

impl SignalType {
    /// Canonical string form, matching the wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            SignalType::Coaccess => "coaccess",
            SignalType::Similarity => "similarity",
            SignalType::Topology => "topology",
            SignalType::LlmInfer => "llm-infer",
            SignalType::Custom(name) => name,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longevity classification for a record, controlling its decay half-life.
///
/// Decay scores compound between accesses and reset on access. The
/// half-lives are calibrated so an untouched episodic record falls to 0.5
/// after about a week, semantic after about ten weeks, procedural after
/// roughly two years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Short-lived observations (~7 day half-life).
    Episodic,
    /// Durable facts (~69 day half-life). Default for new records.
    #[default]
    Semantic,
    /// Long-lived skills and procedures (~693 day half-life).
    Procedural,
}

impl MemoryTier {
    /// Decay half-life in seconds.
    pub fn half_life_secs(&self) -> f64 {
        match self {
            MemoryTier::Episodic => 7.0 * 86_400.0,
            MemoryTier::Semantic => 69.0 * 86_400.0,
            MemoryTier::Procedural => 693.0 * 86_400.0,
        }
    }
}

/// Per-node trust level, scaling the evidence thresholds the inference
/// engine applies before materializing an edge against that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Always allowed; bypasses cooldown and evidence gates.
    Pinned,
    /// Thresholds scaled by 0.9.
    High,
    /// Thresholds unchanged.
    #[default]
    Default,
    /// Thresholds scaled by 1.2.
    Low,
}

impl TrustLevel {
    /// Multiplier applied to evidence thresholds.
    pub fn threshold_scale(&self) -> f64 {
        match self {
            TrustLevel::Pinned => 0.0,
            TrustLevel::High => 0.9,
            TrustLevel::Default => 1.0,
            TrustLevel::Low => 1.2,
        }
    }
}
