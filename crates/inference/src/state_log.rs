//! Append-only JSON-lines state logs
//!
//! The inference stores persist as their own append-only logs under the
//! data directory's `state/` subdirectory (one file per store). Each
//! line is one serialized event; reload replays the file top to bottom.
//! A trailing partial line (torn write) is skipped, matching the WAL's
//! torn-tail semantics.

use nornic_core::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One append-only JSON-lines file.
pub struct StateLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl StateLog {
    /// Open (creating if needed) `state/<name>.jsonl` under `root`.
    pub fn open<P: AsRef<Path>>(root: P, name: &str) -> Result<Self> {
        let dir = root.as_ref().join("state");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.jsonl", name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(StateLog {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one event and flush it.
    pub fn append<T: Serialize>(&self, event: &T) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    /// Replay every decodable event. A torn or corrupt line stops the
    /// replay; everything before it is returned.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        {
            let mut writer = self.writer.lock();
            writer.flush()?;
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "state log replay stopped at undecodable line"
                    );
                    break;
                }
            }
        }
        Ok(events)
    }

    /// File path of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
