//! Replication configuration

use crate::multiregion::ConflictResolution;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which replication mode the node runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Single node, no replication.
    #[default]
    Standalone,
    /// Two-node primary/standby pairing.
    HotStandby,
    /// Raft cluster (3+ nodes, odd count recommended).
    Raft,
    /// Raft cluster per region with cross-region shipping.
    MultiRegion,
}

/// Which side of a hot-standby pairing this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandbyRole {
    /// Accepts writes and ships WAL batches.
    #[default]
    Primary,
    /// Applies shipped batches; read-only until promoted.
    Standby,
}

/// Hot-standby acknowledgment semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Acknowledge the client once the batch is buffered locally.
    /// Risk: loss if the primary crashes before shipping.
    Async,
    /// Wait for the standby to confirm receipt.
    #[default]
    SemiSync,
    /// Wait for the standby to confirm the batch is persisted.
    Sync,
}

/// Replication configuration.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Mode for this node.
    pub mode: ReplicationMode,
    /// This node's identity.
    pub node_id: String,
    /// Address the cluster port binds to.
    pub bind_addr: String,
    /// Address peers should dial.
    pub advertise_addr: String,
    /// Peer node ids and addresses.
    pub peers: Vec<(String, String)>,
    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,
    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,
    /// Leader heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Raft log entries kept before compacting into a snapshot.
    pub snapshot_threshold: usize,
    /// Hot-standby acknowledgment semantics.
    pub ack_mode: AckMode,
    /// Primary or standby side of a hot-standby pairing.
    pub role: StandbyRole,
    /// Unacked-entry backlog beyond which writes fail with
    /// `ReplicaLagExceeded` and the standby treats the stream as lost
    /// (0 = unbounded).
    pub max_lag_entries: u64,
    /// Missed-heartbeat window before the standby begins failover.
    pub failover_timeout: Duration,
    /// Without an external arbiter the standby refuses automatic
    /// promotion; setting this accepts the documented split-brain risk.
    pub allow_unarbitrated_failover: bool,
    /// Region identity (multi-region mode).
    pub region: String,
    /// Cross-region conflict handling (multi-region mode).
    pub conflict: ConflictResolution,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            mode: ReplicationMode::Standalone,
            node_id: "node-1".to_string(),
            bind_addr: "127.0.0.1:7600".to_string(),
            advertise_addr: "127.0.0.1:7600".to_string(),
            peers: Vec::new(),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            snapshot_threshold: 10_000,
            ack_mode: AckMode::SemiSync,
            role: StandbyRole::Primary,
            max_lag_entries: 0,
            failover_timeout: Duration::from_secs(5),
            allow_unarbitrated_failover: false,
            region: String::new(),
            conflict: ConflictResolution::LastWriteWins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.mode, ReplicationMode::Standalone);
        assert_eq!(config.ack_mode, AckMode::SemiSync);
        assert_eq!(config.role, StandbyRole::Primary);
        assert_eq!(config.max_lag_entries, 0);
        assert!(!config.allow_unarbitrated_failover);
        assert!(config.election_timeout_min < config.election_timeout_max);
        assert!(config.heartbeat_interval < config.election_timeout_min);
    }
}
