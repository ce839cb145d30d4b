//! Crash recovery
//!
//! On startup: load the newest readable snapshot (if any), then replay
//! WAL entries with sequence numbers greater than the snapshot's. Replay
//! stops at the first torn or corrupt frame. Recovery is idempotent; it
//! only reads.

use crate::entry::WalEntry;
use crate::snapshot::SnapshotStore;
use crate::wal::{SyncMode, Wal};
use nornic_core::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// What recovery produced: an optional snapshot payload plus the WAL tail
/// to replay on top of it.
pub struct RecoveredState {
    /// Serialized state from the newest readable snapshot, if any.
    pub snapshot: Option<Vec<u8>>,
    /// Sequence number of that snapshot (0 when none).
    pub snapshot_seq: u64,
    /// WAL entries to replay, in sequence order, all with `seq > snapshot_seq`.
    pub tail: Vec<WalEntry>,
    /// The opened WAL, ready for fresh appends.
    pub wal: Arc<Wal>,
}

/// Recover durable state from a data directory.
///
/// `dir` holds the WAL file (`wal.log`) and the `snapshots/` directory.
pub fn recover<P: AsRef<Path>>(dir: P, sync_mode: SyncMode) -> Result<RecoveredState> {
    let dir = dir.as_ref();
    let store = SnapshotStore::open(dir)?;
    let wal = Wal::open(dir.join("wal.log"), sync_mode)?;

    let (snapshot, snapshot_seq) = match store.load_latest()? {
        Some((info, payload)) => (Some(payload), info.seq),
        None => (None, 0),
    };

    let tail = wal.read_after(snapshot_seq)?;
    info!(
        snapshot_seq,
        tail_entries = tail.len(),
        "recovery scan complete"
    );

    Ok(RecoveredState {
        snapshot,
        snapshot_seq,
        tail,
        wal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::WalOp;
    use nornic_core::{NodeId, PropertyMap};
    use tempfile::TempDir;

    fn create_node_op(id: u64) -> WalOp {
        WalOp::CreateNode {
            id: NodeId::new(id),
            labels: vec![],
            properties: PropertyMap::new(),
        }
    }

    #[test]
    fn test_recover_empty_dir() {
        let dir = TempDir::new().unwrap();
        let state = recover(dir.path(), SyncMode::Immediate).unwrap();
        assert!(state.snapshot.is_none());
        assert_eq!(state.snapshot_seq, 0);
        assert!(state.tail.is_empty());
    }

    #[test]
    fn test_recover_wal_only() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(dir.path().join("wal.log"), SyncMode::Immediate).unwrap();
            for i in 1..=4 {
                wal.append(create_node_op(i)).unwrap();
            }
        }
        let state = recover(dir.path(), SyncMode::Immediate).unwrap();
        assert!(state.snapshot.is_none());
        assert_eq!(state.tail.len(), 4);
    }

    #[test]
    fn test_recover_snapshot_plus_tail() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(dir.path().join("wal.log"), SyncMode::Immediate).unwrap();
            for i in 1..=6 {
                wal.append(create_node_op(i)).unwrap();
            }
            let store = SnapshotStore::open(dir.path()).unwrap();
            store.write(4, b"compacted-through-4").unwrap();
        }
        let state = recover(dir.path(), SyncMode::Immediate).unwrap();
        assert_eq!(state.snapshot_seq, 4);
        assert_eq!(state.snapshot.as_deref(), Some(&b"compacted-through-4"[..]));
        let seqs: Vec<u64> = state.tail.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![5, 6]);
    }

    #[test]
    fn test_recover_is_idempotent() {
        let dir = TempDir::new().unwrap();
        {
            let wal = Wal::open(dir.path().join("wal.log"), SyncMode::Immediate).unwrap();
            wal.append(create_node_op(1)).unwrap();
        }
        let first = recover(dir.path(), SyncMode::Immediate).unwrap();
        let first_len = first.tail.len();
        drop(first);
        let second = recover(dir.path(), SyncMode::Immediate).unwrap();
        assert_eq!(second.tail.len(), first_len);
    }
}
