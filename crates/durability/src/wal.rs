//! The write-ahead log
//!
//! Append-only log of framed entries persisted to disk. The file starts
//! with a fixed header recording the magic, format version, and the sync
//! mode it was created with; entries follow as `[len][crc][payload]`
//! frames (see [`crate::entry`]).
//!
//! ## Sync modes
//!
//! - `Immediate` - fsync after every append (slow, maximum durability)
//! - `Batch` - periodic fsync on a configured interval
//! - `None` - no fsync; the caller accepts loss of un-flushed entries
//!
//! ## Failure semantics
//!
//! A write or sync error poisons the log: every subsequent append fails
//! with `Durability` until [`Wal::clear_failure`] is called after space
//! has been reclaimed. This fail-stop behavior is what lets the storage
//! engine promise it never applied a mutation it could not log.

use crate::entry::{decode_entry, encode_entry, WalEntry, WalOp};
use nornic_core::{NornicError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const WAL_MAGIC: [u8; 4] = *b"NORW";
const WAL_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 8;

/// When fsync is called to push appended entries to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// fsync after every append.
    Immediate,
    /// Periodic fsync on the given interval.
    Batch {
        /// Maximum time between fsyncs.
        interval: Duration,
    },
    /// No fsync. Un-flushed entries are lost on crash.
    None,
}

impl SyncMode {
    fn tag(&self) -> u8 {
        match self {
            SyncMode::Immediate => 1,
            SyncMode::Batch { .. } => 2,
            SyncMode::None => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(SyncMode::Immediate),
            2 => Ok(SyncMode::Batch {
                interval: Duration::from_millis(100),
            }),
            3 => Ok(SyncMode::None),
            other => Err(NornicError::corruption(format!(
                "unknown wal sync-mode tag {}",
                other
            ))),
        }
    }
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Batch {
            interval: Duration::from_millis(100),
        }
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Default)]
pub struct WalStats {
    /// Entries appended since open.
    pub entries_appended: u64,
    /// Bytes appended since open (frames only, not the header).
    pub bytes_appended: u64,
    /// fsync calls performed.
    pub syncs: u64,
}

struct WalInner {
    writer: BufWriter<File>,
    last_sync: Instant,
}

/// Append-only write-ahead log.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
    sync_mode: SyncMode,
    next_seq: AtomicU64,
    failed: AtomicBool,
    entries_appended: AtomicU64,
    bytes_appended: AtomicU64,
    syncs: AtomicU64,
}

impl Wal {
    /// Open an existing WAL or create a new one.
    ///
    /// Creates parent directories as needed. On an existing file the
    /// header is validated and the tail is scanned to find the next
    /// sequence number; a torn tail is truncated away so fresh appends
    /// land on a clean frame boundary.
    pub fn open<P: AsRef<Path>>(path: P, sync_mode: SyncMode) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let (next_seq, valid_len) = if fresh {
            let mut header = [0u8; FILE_HEADER_LEN];
            header[0..4].copy_from_slice(&WAL_MAGIC);
            header[4..6].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
            header[6] = sync_mode.tag();
            header[7] = 0;
            file.write_all(&header)?;
            file.sync_all()?;
            (1, FILE_HEADER_LEN as u64)
        } else {
            let (last_seq, valid_len) = Self::scan(&mut file)?;
            (last_seq + 1, valid_len)
        };

        // Truncate any torn tail so fresh appends start on a frame boundary.
        let actual_len = file.metadata()?.len();
        if actual_len > valid_len {
            warn!(
                torn_bytes = actual_len - valid_len,
                "truncating torn wal tail"
            );
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), next_seq, "wal opened");

        Ok(Arc::new(Wal {
            path,
            inner: Mutex::new(WalInner {
                writer: BufWriter::new(file),
                last_sync: Instant::now(),
            }),
            sync_mode,
            next_seq: AtomicU64::new(next_seq),
            failed: AtomicBool::new(false),
            entries_appended: AtomicU64::new(0),
            bytes_appended: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
        }))
    }

    /// Validate the header and scan entries, returning the last sequence
    /// number seen and the byte length of the valid prefix.
    fn scan(file: &mut File) -> Result<(u64, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; FILE_HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| NornicError::corruption("wal header truncated"))?;
        if header[0..4] != WAL_MAGIC {
            return Err(NornicError::corruption("bad wal magic"));
        }
        let version = u16::from_be_bytes([header[4], header[5]]);
        if version != WAL_FORMAT_VERSION {
            return Err(NornicError::corruption(format!(
                "unsupported wal format version {}",
                version
            )));
        }
        SyncMode::from_tag(header[6])?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut offset = 0usize;
        let mut last_seq = 0u64;
        loop {
            match decode_entry(&buf[offset..]) {
                Ok(Some((entry, consumed))) => {
                    last_seq = entry.seq;
                    offset += consumed;
                }
                // Incomplete frame at the tail: stop, everything after is torn.
                Ok(None) => break,
                // Corrupt frame: same treatment, replay stops here.
                Err(_) => break,
            }
        }
        Ok((last_seq, (FILE_HEADER_LEN + offset) as u64))
    }

    /// Append a single operation, assigning it the next sequence number.
    pub fn append(&self, op: WalOp) -> Result<u64> {
        self.append_batch(vec![op]).map(|seqs| seqs[0])
    }

    /// Append a batch of operations atomically with respect to ordering:
    /// sequence numbers are contiguous and frames are written in order.
    pub fn append_batch(&self, ops: Vec<WalOp>) -> Result<Vec<u64>> {
        if self.failed.load(Ordering::Acquire) {
            return Err(NornicError::durability(
                "wal is in failed state; reclaim space and clear the failure",
            ));
        }
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let first_seq = self
            .next_seq
            .fetch_add(ops.len() as u64, Ordering::SeqCst);

        let mut frames = Vec::with_capacity(ops.len());
        let mut seqs = Vec::with_capacity(ops.len());
        let mut total_bytes = 0u64;
        for (i, op) in ops.into_iter().enumerate() {
            let seq = first_seq + i as u64;
            let entry = WalEntry::new(seq, op);
            let frame = encode_entry(&entry)?;
            total_bytes += frame.len() as u64;
            frames.push(frame);
            seqs.push(seq);
        }

        let mut inner = self.inner.lock();
        for frame in &frames {
            if let Err(e) = inner.writer.write_all(frame) {
                self.failed.store(true, Ordering::Release);
                return Err(NornicError::durability_with_source("wal append failed", e));
            }
        }

        match self.sync_mode {
            SyncMode::Immediate => {
                self.sync_locked(&mut inner)?;
            }
            SyncMode::Batch { interval } => {
                if inner.last_sync.elapsed() >= interval {
                    self.sync_locked(&mut inner)?;
                }
            }
            SyncMode::None => {
                // Keep entries visible to readers even without durability.
                if let Err(e) = inner.writer.flush() {
                    self.failed.store(true, Ordering::Release);
                    return Err(NornicError::durability_with_source("wal flush failed", e));
                }
            }
        }

        self.entries_appended
            .fetch_add(seqs.len() as u64, Ordering::Relaxed);
        self.bytes_appended.fetch_add(total_bytes, Ordering::Relaxed);
        Ok(seqs)
    }

    fn sync_locked(&self, inner: &mut WalInner) -> Result<()> {
        if let Err(e) = inner
            .writer
            .flush()
            .and_then(|_| inner.writer.get_mut().sync_all())
        {
            self.failed.store(true, Ordering::Release);
            return Err(NornicError::durability_with_source("wal fsync failed", e));
        }
        inner.last_sync = Instant::now();
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush buffered frames to the OS. Does not guarantee durability.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .writer
            .flush()
            .map_err(|e| NornicError::durability_with_source("wal flush failed", e))
    }

    /// Flush and fsync regardless of sync mode.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.sync_locked(&mut inner)
    }

    /// Read every entry with `seq > after_seq`, stopping at the first
    /// torn or corrupt frame.
    pub fn read_after(&self, after_seq: u64) -> Result<Vec<WalEntry>> {
        // Make buffered frames visible to the read handle.
        {
            let mut inner = self.inner.lock();
            let _ = inner.writer.flush();
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(FILE_HEADER_LEN as u64))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;
        loop {
            match decode_entry(&buf[offset..]) {
                Ok(Some((entry, consumed))) => {
                    if entry.seq > after_seq {
                        entries.push(entry);
                    }
                    offset += consumed;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, offset, "wal replay stopped at corrupt frame");
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Read every entry in the log.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        self.read_after(0)
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Whether the log is refusing appends after a write failure.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Clear the fail-stop flag after the operator has reclaimed space.
    pub fn clear_failure(&self) {
        self.failed.store(false, Ordering::Release);
    }

    /// The sync mode this log was opened with.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// File path of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Observability counters.
    pub fn stats(&self) -> WalStats {
        WalStats {
            entries_appended: self.entries_appended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let _ = inner.writer.flush();
        let _ = inner.writer.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nornic_core::{NodeId, PropertyMap};
    use std::io::Write as _;
    use tempfile::TempDir;

    fn create_node_op(id: u64) -> WalOp {
        WalOp::CreateNode {
            id: NodeId::new(id),
            labels: vec!["T".to_string()],
            properties: PropertyMap::new(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log"), SyncMode::Immediate).unwrap();

        for i in 1..=5 {
            let seq = wal.append(create_node_op(i)).unwrap();
            assert_eq!(seq, i);
        }

        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 5);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.seq, i as u64 + 1);
        }
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = Wal::open(&path, SyncMode::Immediate).unwrap();
            wal.append(create_node_op(1)).unwrap();
            wal.append(create_node_op(2)).unwrap();
        }
        let wal = Wal::open(&path, SyncMode::Immediate).unwrap();
        assert_eq!(wal.next_seq(), 3);
        let seq = wal.append(create_node_op(3)).unwrap();
        assert_eq!(seq, 3);
        assert_eq!(wal.read_all().unwrap().len(), 3);
    }

    #[test]
    fn test_read_after_filters() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log"), SyncMode::Immediate).unwrap();
        for i in 1..=10 {
            wal.append(create_node_op(i)).unwrap();
        }
        let tail = wal.read_after(7).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].seq, 8);
    }

    #[test]
    fn test_torn_tail_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = Wal::open(&path, SyncMode::Immediate).unwrap();
            for i in 1..=3 {
                wal.append(create_node_op(i)).unwrap();
            }
        }
        // Simulate a crash mid-write: append garbage that looks like the
        // start of a frame but is cut short.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x00, 0x00, 0x01, 0x00, 0xAA, 0xBB]).unwrap();
            file.sync_all().unwrap();
        }

        let wal = Wal::open(&path, SyncMode::Immediate).unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 3);
        // The torn bytes were truncated; new appends continue cleanly.
        let seq = wal.append(create_node_op(4)).unwrap();
        assert_eq!(seq, 4);
        assert_eq!(wal.read_all().unwrap().len(), 4);
    }

    #[test]
    fn test_corrupt_middle_entry_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let wal = Wal::open(&path, SyncMode::Immediate).unwrap();
            for i in 1..=3 {
                wal.append(create_node_op(i)).unwrap();
            }
        }
        // Flip a payload byte in the second frame.
        {
            let data = std::fs::read(&path).unwrap();
            let mut data = data;
            // Header is 8 bytes; first frame follows. Find second frame start.
            let first_len =
                u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize + 8;
            let second_payload_start = 8 + first_len + 8;
            data[second_payload_start] ^= 0xFF;
            std::fs::write(&path, data).unwrap();
        }

        let wal = Wal::open(&path, SyncMode::Immediate).unwrap();
        let entries = wal.read_all().unwrap();
        // Only the first entry survives; the corrupt frame and everything
        // after it are discarded.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 1);
    }

    #[test]
    fn test_batch_append_contiguous_seqs() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log"), SyncMode::default()).unwrap();
        let seqs = wal
            .append_batch((1..=4).map(create_node_op).collect())
            .unwrap();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_sync_mode_none_still_readable() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log"), SyncMode::None).unwrap();
        wal.append(create_node_op(1)).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_stats_counters() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path().join("wal.log"), SyncMode::Immediate).unwrap();
        wal.append(create_node_op(1)).unwrap();
        wal.append(create_node_op(2)).unwrap();
        let stats = wal.stats();
        assert_eq!(stats.entries_appended, 2);
        assert!(stats.bytes_appended > 0);
        assert!(stats.syncs >= 2);
    }
}
