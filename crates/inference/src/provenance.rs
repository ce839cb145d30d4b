//! Provenance log
//!
//! Append-only record of why, when, and from what signal each edge was
//! materialized. Records are never mutated; the in-memory tail backs
//! queries and the state log carries the durable copy.

use crate::state_log::StateLog;
use nornic_core::{now_millis, NodeId, Result, SessionId, SignalType, TimestampMillis};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Source node.
    pub src: NodeId,
    /// Target node.
    pub dst: NodeId,
    /// Edge label.
    pub label: String,
    /// Confidence score at materialization.
    pub score: f64,
    /// Signal classification.
    pub signal: SignalType,
    /// Session that tipped the decision.
    pub session: SessionId,
    /// Materialization wall time (ms epoch).
    pub at_millis: TimestampMillis,
    /// Accumulated evidence count at materialization (0 when the
    /// evidence gate was bypassed).
    pub evidence_count: u64,
    /// Edge decay score at materialization.
    pub decay_score: f64,
}

/// The append-only provenance log.
pub struct ProvenanceLog {
    records: RwLock<Vec<ProvenanceRecord>>,
    log: Option<StateLog>,
}

impl ProvenanceLog {
    /// In-memory log (tests, ephemeral stores).
    pub fn in_memory() -> Self {
        ProvenanceLog {
            records: RwLock::new(Vec::new()),
            log: None,
        }
    }

    /// Durable log persisted under `root/state/provenance.jsonl`,
    /// reloading existing records.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let log = StateLog::open(root, "provenance")?;
        let records: Vec<ProvenanceRecord> = log.read_all()?;
        Ok(ProvenanceLog {
            records: RwLock::new(records),
            log: Some(log),
        })
    }

    /// Append a record.
    pub fn append(&self, mut record: ProvenanceRecord) -> Result<()> {
        if record.at_millis == 0 {
            record.at_millis = now_millis();
        }
        if let Some(log) = &self.log {
            log.append(&record)?;
        }
        self.records.write().push(record);
        Ok(())
    }

    /// All records for a triple, in append order.
    pub fn for_triple(&self, src: NodeId, dst: NodeId, label: &str) -> Vec<ProvenanceRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.src == src && r.dst == dst && r.label == label)
            .cloned()
            .collect()
    }

    /// The `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ProvenanceRecord> {
        let records = self.records.read();
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Total record count.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
