//! Multi-region shipping
//!
//! Each region runs its own Raft cluster; regional leaders ship WAL
//! batches to each other asynchronously (or semi-sync). Because regions
//! accept writes independently, the same record can be modified in two
//! places: conflicts are resolved last-write-wins on the per-record
//! timestamp (default), or recorded for external resolution in `manual`
//! mode.

use nornic_core::{EdgeId, NodeId, TimestampMillis};
use nornic_durability::{WalEntry, WalOp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Conflict handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Newer per-record timestamp wins (default).
    #[default]
    LastWriteWins,
    /// Conflicts are recorded and left for external resolution; the
    /// remote write is not applied.
    Manual,
}

/// Which record a WAL entry touches, for conflict keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// A node record.
    Node(NodeId),
    /// An edge record.
    Edge(EdgeId),
}

impl RecordKey {
    fn of(op: &WalOp) -> RecordKey {
        match op {
            WalOp::CreateNode { id, .. }
            | WalOp::DeleteNode { id }
            | WalOp::SetProperty { id, .. } => RecordKey::Node(*id),
            WalOp::CreateEdge { id, .. } | WalOp::DeleteEdge { id } => RecordKey::Edge(*id),
        }
    }
}

/// A recorded cross-region conflict (manual mode, or LWW rejections kept
/// for observability).
#[derive(Debug, Clone, PartialEq)]
pub struct RegionConflict {
    /// The contested record.
    pub key: RecordKey,
    /// Region the losing write came from.
    pub remote_region: String,
    /// Local write timestamp.
    pub local_ts: TimestampMillis,
    /// Remote write timestamp.
    pub remote_ts: TimestampMillis,
    /// The remote entry that was not applied.
    pub remote_entry: WalEntry,
}

/// Outcome for one remote entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Apply the entry to local storage.
    Apply(WalEntry),
    /// Skipped: the local write is newer (LWW).
    SkippedOlder,
    /// Recorded as a conflict for external resolution (manual mode).
    ConflictRecorded,
}

/// Cross-region shipping state for one region.
pub struct RegionShipper {
    region: String,
    resolution: ConflictResolution,
    /// Last local write timestamp per record.
    local_writes: RwLock<HashMap<RecordKey, TimestampMillis>>,
    /// Unresolved conflicts (manual mode).
    conflicts: RwLock<Vec<RegionConflict>>,
}

impl RegionShipper {
    /// Shipper for `region` with the given strategy.
    pub fn new(region: impl Into<String>, resolution: ConflictResolution) -> Self {
        RegionShipper {
            region: region.into(),
            resolution,
            local_writes: RwLock::new(HashMap::new()),
            conflicts: RwLock::new(Vec::new()),
        }
    }

    /// This shipper's region id.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Record a local write so later remote writes can be compared.
    pub fn note_local_write(&self, op: &WalOp, ts: TimestampMillis) {
        self.local_writes.write().insert(RecordKey::of(op), ts);
    }

    /// Evaluate a remote batch. Entries the caller should apply come
    /// back as `Apply`; losers of LWW are skipped; manual-mode clashes
    /// are recorded.
    pub fn apply_remote_batch(
        &self,
        batch: Vec<(WalEntry, TimestampMillis)>,
        from_region: &str,
    ) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for (entry, remote_ts) in batch {
            let key = RecordKey::of(&entry.op);
            let local_ts = self.local_writes.read().get(&key).copied();

            let outcome = match local_ts {
                // Untouched locally: apply and adopt the remote stamp.
                None => {
                    self.local_writes.write().insert(key, remote_ts);
                    ApplyOutcome::Apply(entry)
                }
                Some(local) => match self.resolution {
                    ConflictResolution::LastWriteWins => {
                        if remote_ts > local {
                            self.local_writes.write().insert(key, remote_ts);
                            ApplyOutcome::Apply(entry)
                        } else {
                            debug!(
                                region = %self.region,
                                from_region,
                                ?key,
                                "lww: keeping newer local write"
                            );
                            ApplyOutcome::SkippedOlder
                        }
                    }
                    ConflictResolution::Manual => {
                        warn!(
                            region = %self.region,
                            from_region,
                            ?key,
                            "cross-region conflict recorded for manual resolution"
                        );
                        self.conflicts.write().push(RegionConflict {
                            key,
                            remote_region: from_region.to_string(),
                            local_ts: local,
                            remote_ts,
                            remote_entry: entry,
                        });
                        ApplyOutcome::ConflictRecorded
                    }
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Drain recorded conflicts for external resolution.
    pub fn take_conflicts(&self) -> Vec<RegionConflict> {
        std::mem::take(&mut *self.conflicts.write())
    }

    /// Number of unresolved conflicts.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.read().len()
    }
}
