//! Snapshot store
//!
//! Snapshots are physical (materialized state), not semantic (history):
//! they compact WAL effects so recovery replays only the tail. Each file
//! in `snapshots/` is named by the sequence number at which it was taken
//! (`{seq:020}.snap`) and carries a CRC over its payload. Writes go to a
//! temp file first and are renamed into place, so a crash mid-write never
//! leaves a half-visible snapshot.

use nornic_core::{NornicError, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SNAPSHOT_MAGIC: [u8; 4] = *b"NORS";
const SNAPSHOT_VERSION: u16 = 1;
const HEADER_LEN: usize = 22; // magic(4) + version(2) + seq(8) + len(4) + crc(4)

/// Metadata for a snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Sequence number the snapshot was taken at.
    pub seq: u64,
    /// File path.
    pub path: PathBuf,
    /// Payload size in bytes.
    pub size: u64,
}

/// Directory of numbered snapshot files.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) the `snapshots/` directory under `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let dir = root.as_ref().join("snapshots");
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStore { dir })
    }

    /// Directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(seq: u64) -> String {
        format!("{:020}.snap", seq)
    }

    /// Write a snapshot taken at `seq` with the given serialized payload.
    ///
    /// Atomic: written to a `.tmp` sibling and renamed into place.
    pub fn write(&self, seq: u64, payload: &[u8]) -> Result<SnapshotInfo> {
        let final_path = self.dir.join(Self::file_name(seq));
        let tmp_path = final_path.with_extension("snap.tmp");

        let crc = crc32fast::hash(payload);
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
        header[4..6].copy_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
        header[6..14].copy_from_slice(&seq.to_be_bytes());
        header[14..18].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        header[18..22].copy_from_slice(&crc.to_be_bytes());

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&header)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        info!(seq, bytes = payload.len(), "snapshot written");
        Ok(SnapshotInfo {
            seq,
            path: final_path,
            size: payload.len() as u64,
        })
    }

    /// List snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !name.ends_with(".snap") {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".snap") {
                if let Ok(seq) = stem.parse::<u64>() {
                    let size = entry.metadata()?.len().saturating_sub(HEADER_LEN as u64);
                    snapshots.push(SnapshotInfo { seq, path, size });
                }
            }
        }
        snapshots.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(snapshots)
    }

    /// Read and validate one snapshot file, returning its payload.
    pub fn read(&self, info: &SnapshotInfo) -> Result<Vec<u8>> {
        let mut file = File::open(&info.path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| NornicError::corruption("snapshot header truncated"))?;

        if header[0..4] != SNAPSHOT_MAGIC {
            return Err(NornicError::corruption("bad snapshot magic"));
        }
        let version = u16::from_be_bytes([header[4], header[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(NornicError::corruption(format!(
                "unsupported snapshot version {}",
                version
            )));
        }
        let seq = u64::from_be_bytes(header[6..14].try_into().expect("slice length"));
        if seq != info.seq {
            return Err(NornicError::corruption(format!(
                "snapshot seq mismatch: file says {}, name says {}",
                seq, info.seq
            )));
        }
        let len = u32::from_be_bytes(header[14..18].try_into().expect("slice length")) as usize;
        let expected_crc = u32::from_be_bytes(header[18..22].try_into().expect("slice length"));

        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|_| NornicError::corruption("snapshot payload truncated"))?;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            return Err(NornicError::corruption("snapshot crc mismatch"));
        }
        Ok(payload)
    }

    /// Load the newest readable snapshot.
    ///
    /// A corrupt snapshot is skipped with a warning and the next-older one
    /// is tried, so recovery degrades to an older durability point rather
    /// than failing outright. Returns `None` when no usable snapshot
    /// exists.
    pub fn load_latest(&self) -> Result<Option<(SnapshotInfo, Vec<u8>)>> {
        for info in self.list()? {
            match self.read(&info) {
                Ok(payload) => {
                    debug!(seq = info.seq, "snapshot loaded");
                    return Ok(Some((info, payload)));
                }
                Err(e) => {
                    warn!(seq = info.seq, error = %e, "skipping unreadable snapshot");
                }
            }
        }
        Ok(None)
    }

    /// Delete snapshots older than `keep` newest ones.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let snapshots = self.list()?;
        let mut removed = 0;
        for info in snapshots.into_iter().skip(keep) {
            fs::remove_file(&info.path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_load_latest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        store.write(10, b"state-at-10").unwrap();
        store.write(25, b"state-at-25").unwrap();

        let (info, payload) = store.load_latest().unwrap().unwrap();
        assert_eq!(info.seq, 25);
        assert_eq!(payload, b"state-at-25");
    }

    #[test]
    fn test_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.load_latest().unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_latest_falls_back_to_previous() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();

        store.write(10, b"good-old-state").unwrap();
        let newer = store.write(20, b"newer-state").unwrap();

        // Corrupt the newer snapshot's payload.
        let mut data = fs::read(&newer.path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&newer.path, data).unwrap();

        let (info, payload) = store.load_latest().unwrap().unwrap();
        assert_eq!(info.seq, 10);
        assert_eq!(payload, b"good-old-state");
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        for seq in [1, 2, 3, 4, 5] {
            store.write(seq, b"x").unwrap();
        }
        let removed = store.prune(2).unwrap();
        assert_eq!(removed, 3);
        let remaining: Vec<u64> = store.list().unwrap().iter().map(|s| s.seq).collect();
        assert_eq!(remaining, vec![5, 4]);
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.write(1, b"payload").unwrap();
        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.contains("tmp")), "{:?}", names);
    }
}
