//! # NornicDB
//!
//! A graph database core: labeled property nodes and typed
//! relationships with WAL durability, hybrid retrieval (dense vector
//! search fused with lexical scoring), and a real-time inference engine
//! that materializes relationships from accumulated evidence under
//! cooldown, per-node policy, and provenance rules.
//!
//! # Quick Start
//!
//! ```no_run
//! use nornicdb::{GraphDb, PropertyMap, Value, EdgeSuggestion, SignalType, Direction};
//!
//! fn main() -> nornicdb::Result<()> {
//!     let db = GraphDb::open("./my-data")?;
//!
//!     // Nodes and edges
//!     let alice = db.put_node(vec!["Person".into()], PropertyMap::new())?;
//!     let bob = db.put_node(vec!["Person".into()], PropertyMap::new())?;
//!     db.put_edge(alice, bob, "knows", PropertyMap::new())?;
//!     db.set_property(alice, "name", Value::String("Alice".into()))?;
//!
//!     // Vector search
//!     db.add_embedding(alice, &vec![0.1; 384])?;
//!     let hits = db.search(&vec![0.1; 384], 10)?;
//!
//!     // Edge inference: corroborating signals materialize an edge once
//!     // the evidence thresholds are met.
//!     let decision = db.suggest(EdgeSuggestion {
//!         src: alice,
//!         dst: bob,
//!         label: "relates_to".into(),
//!         confidence: 0.9,
//!         signal: SignalType::Coaccess,
//!         session: "session-1".into(),
//!     })?;
//!     println!("materialized: {}", decision.materialize);
//!
//!     for edge in db.list_edges(alice, Direction::Outgoing, None) {
//!         println!("{} -> {} [{}]", edge.src, edge.dst, edge.label);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! [`GraphDb`] is the entry point, wiring the member crates:
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `nornic-core` | Ids, values, records, errors, cancellation |
//! | `nornic-durability` | WAL, snapshots, recovery, write-behind |
//! | `nornic-storage` | Node/edge maps, adjacency, label scans |
//! | `nornic-vector` | Vector index, k-means, embedding cache |
//! | `nornic-search` | Reciprocal Rank Fusion |
//! | `nornic-temporal` | Kalman access tracking, tier decay |
//! | `nornic-auth` | JWT, user directory, cluster-peer tokens |
//! | `nornic-inference` | Cooldown / evidence / rules / provenance |
//! | `nornic-replication` | Hot standby, Raft, multi-region |
//! | `nornic-engine` | The `GraphDb` coordinator |
//!
//! The Cypher front-end, wire servers, and RBAC layer sit above this
//! crate and consume the resolved API.

pub use nornic_core::{
    CancelToken, Direction, Edge, EdgeId, MemoryTier, Node, NodeId, NornicError, PropertyMap,
    Result, SessionId, SignalType, TimestampMillis, TrustLevel, Value,
};
pub use nornic_durability::{SyncMode, WalEntry, WalOp};
pub use nornic_engine::{GraphDb, GraphDbConfig, ReplicationRuntime, CONFIG_FILE_NAME};
pub use nornic_inference::{
    Decision, EdgeSuggestion, EvidenceThresholds, InferenceConfig, NodeRule,
};
pub use nornic_search::{rrf_fuse, FusedHit, RankedList, RrfConfig, WeightProfile};
pub use nornic_storage::{GraphStats, GraphStore, LabelScan};
pub use nornic_temporal::{AccessTracker, KalmanFilter, Prediction, TrackerConfig, Trend};
pub use nornic_vector::{
    CacheStats, CachedEmbedder, Embedder, InitMethod, KMeansConfig, SearchHit, VectorIndex,
};
pub use nornic_auth::{AuthConfig, Authenticator, Claims, JwtSigner, TokenResponse};
pub use nornic_replication::{
    AckMode, ConflictResolution, LogEntry, LogPayload, Message, RaftConfig, RaftNode, RaftRole,
    ReplicationConfig, ReplicationMode, StandbyRole,
};
