//! Replication layer for NornicDB
//!
//! Three modes under one roof:
//!
//! - **Hot standby** (two nodes): the primary streams WAL batches to a
//!   standby with async / semi-sync / sync acknowledgment. Failover
//!   fences the old primary before promotion, and is refused without an
//!   external arbiter unless explicitly allowed (the two-node mode has
//!   no quorum; split-brain avoidance depends on outside arbitration).
//! - **Raft** (3+ nodes): leader election, log replication, majority
//!   commit, log compaction by snapshot, membership changes through the
//!   log.
//! - **Multi-region**: a cluster per region plus asynchronous WAL
//!   shipping between regional leaders with last-write-wins or manual
//!   conflict handling.
//!
//! All modes share one length-prefixed JSON wire protocol on the cluster
//! port. Election and heartbeat timing is monotonic; wall-clock jumps
//! never shorten or extend a timeout.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod multiregion;
pub mod raft;
pub mod standby;
pub mod transport;
pub mod wire;

pub use config::{AckMode, ReplicationConfig, ReplicationMode, StandbyRole};
pub use multiregion::{ApplyOutcome, ConflictResolution, RegionConflict, RegionShipper};
pub use raft::{RaftConfig, RaftNode, RaftRole};
pub use standby::{FailoverDecision, PrimaryState, StandbyState};
pub use wire::{decode_frame, encode_frame, LogEntry, LogPayload, Message, SnapshotBlob};
