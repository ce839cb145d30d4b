//! Async write-behind buffer
//!
//! When async writes are enabled, a mutation returns success once its
//! entry is visible in memory and queued here; a background flusher
//! commits the buffer to the WAL on a fixed cadence (default 50 ms).
//! Callers observing async mode see "accepted, not yet durable".

use crate::wal::Wal;
use crate::entry::WalOp;
use nornic_core::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// Default flush cadence.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

struct Buffer {
    ops: Vec<WalOp>,
}

/// Buffered WAL writer with a dedicated background flusher thread.
pub struct WriteBehind {
    wal: Arc<Wal>,
    buffer: Arc<Mutex<Buffer>>,
    wake: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl WriteBehind {
    /// Start a write-behind buffer over the given WAL.
    pub fn start(wal: Arc<Wal>, interval: Duration) -> Arc<Self> {
        let buffer = Arc::new(Mutex::new(Buffer { ops: Vec::new() }));
        let wake = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let wb = Arc::new(WriteBehind {
            wal: Arc::clone(&wal),
            buffer: Arc::clone(&buffer),
            wake: Arc::clone(&wake),
            shutdown: Arc::clone(&shutdown),
            flusher: Mutex::new(None),
        });

        let handle = {
            let wal = Arc::clone(&wal);
            let buffer = Arc::clone(&buffer);
            let wake = Arc::clone(&wake);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("nornic-wal-flusher".to_string())
                .spawn(move || {
                    loop {
                        let drained: Vec<WalOp> = {
                            let mut guard = buffer.lock();
                            if guard.ops.is_empty() && !shutdown.load(Ordering::Acquire) {
                                wake.wait_for(&mut guard, interval);
                            }
                            std::mem::take(&mut guard.ops)
                        };

                        if !drained.is_empty() {
                            let count = drained.len();
                            match wal.append_batch(drained) {
                                Ok(_) => debug!(count, "write-behind flushed"),
                                Err(e) => {
                                    // The WAL is now fail-stopped; new enqueues
                                    // will surface the error synchronously.
                                    error!(error = %e, "write-behind flush failed");
                                }
                            }
                        }

                        if shutdown.load(Ordering::Acquire) {
                            let guard = buffer.lock();
                            if guard.ops.is_empty() {
                                break;
                            }
                        }
                    }
                })
                .expect("failed to spawn wal flusher thread")
        };
        *wb.flusher.lock() = Some(handle);
        wb
    }

    /// Queue an operation. Returns once the op is buffered; durability
    /// arrives when the flusher commits.
    pub fn enqueue(&self, op: WalOp) -> Result<()> {
        if self.wal.is_failed() {
            return Err(nornic_core::NornicError::durability(
                "wal is in failed state; reclaim space and clear the failure",
            ));
        }
        let mut guard = self.buffer.lock();
        guard.ops.push(op);
        self.wake.notify_one();
        Ok(())
    }

    /// Number of buffered, not-yet-durable operations.
    pub fn pending(&self) -> usize {
        self.buffer.lock().ops.len()
    }

    /// Synchronously drain the buffer into the WAL and fsync.
    ///
    /// Used by shutdown paths and by tests that need a durability point.
    pub fn drain(&self) -> Result<()> {
        let drained: Vec<WalOp> = {
            let mut guard = self.buffer.lock();
            std::mem::take(&mut guard.ops)
        };
        if !drained.is_empty() {
            self.wal.append_batch(drained)?;
        }
        self.wal.sync()
    }

    /// Stop the flusher, draining anything still buffered.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_all();
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        let _ = self.drain();
    }
}

impl Drop for WriteBehind {
    fn drop(&mut self) {
        self.stop();
    }
}
