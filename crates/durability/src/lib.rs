//! Durability layer for NornicDB
//!
//! This crate owns everything that touches disk on the write path:
//! - WAL entry types and the CRC-framed entry codec
//! - The write-ahead log itself, with three sync modes
//! - The async write-behind buffer and its background flusher
//! - Numbered snapshots with atomic temp-file writes
//! - Crash recovery (latest good snapshot + WAL tail replay)
//!
//! ## Ordered durability invariant
//!
//! For any applied entry E, every entry with a lower sequence number is
//! also applied. Replay preserves append order; a torn tail entry (bad
//! CRC or short read) terminates replay and everything after the break
//! is discarded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod recovery;
pub mod snapshot;
pub mod wal;
pub mod write_behind;

pub use entry::{LogicalClock, WalEntry, WalOp};
pub use recovery::{recover, RecoveredState};
pub use snapshot::{SnapshotInfo, SnapshotStore};
pub use wal::{SyncMode, Wal, WalStats};
pub use write_behind::WriteBehind;
