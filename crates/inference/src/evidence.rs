//! Evidence buffer
//!
//! Corroborating signals accumulate per (src, dst, label) triple until
//! the thresholds are met; the record is cleared on materialization or
//! evicted when it exceeds the configured maximum age.
//!
//! The triple's life cycle: Silent → Accumulating (first evidence) →
//! Ready (thresholds met) → cleared on materialization → Silent.

use crate::config::EvidenceThresholds;
use nornic_core::{now_millis, NodeId, SessionId, SignalType, TimestampMillis};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Accumulated evidence for one triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSignal {
    /// Accumulated signal count.
    pub count: u64,
    /// Accumulated score.
    pub score: f64,
    /// Distinct contributing sessions.
    pub sessions: BTreeSet<SessionId>,
    /// First signal (ms epoch).
    pub first_seen: TimestampMillis,
    /// Latest signal (ms epoch).
    pub last_seen: TimestampMillis,
}

impl EvidenceSignal {
    /// Whether the thresholds are all met.
    pub fn meets(&self, thresholds: &EvidenceThresholds) -> bool {
        self.count >= thresholds.min_count
            && self.score >= thresholds.min_score
            && self.sessions.len() as u64 >= thresholds.min_sessions
    }
}

struct TrackedSignal {
    signal: EvidenceSignal,
    /// Monotonic age anchor for eviction.
    last_seen_at: Instant,
}

/// Persisted evidence event (append-only log entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceEvent {
    /// A signal was added.
    Add {
        /// Source node.
        src: NodeId,
        /// Target node.
        dst: NodeId,
        /// Edge label.
        label: String,
        /// Signal score.
        score: f64,
        /// Signal classification.
        signal: SignalType,
        /// Contributing session.
        session: SessionId,
        /// Wall time (ms epoch).
        at_millis: TimestampMillis,
    },
    /// The triple's accumulated evidence was cleared (materialized or
    /// evicted).
    Clear {
        /// Source node.
        src: NodeId,
        /// Target node.
        dst: NodeId,
        /// Edge label.
        label: String,
    },
}

/// The evidence buffer.
pub struct EvidenceBuffer {
    entries: RwLock<HashMap<(NodeId, NodeId, String), TrackedSignal>>,
}

impl Default for EvidenceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        EvidenceBuffer {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Accumulate one signal, returning a snapshot of the triple's
    /// updated evidence and the loggable event.
    pub fn add(
        &self,
        src: NodeId,
        dst: NodeId,
        label: &str,
        score: f64,
        signal: SignalType,
        session: SessionId,
    ) -> (EvidenceSignal, EvidenceEvent) {
        let at_millis = now_millis();
        let mut entries = self.entries.write();
        let tracked = entries
            .entry((src, dst, label.to_string()))
            .or_insert_with(|| TrackedSignal {
                signal: EvidenceSignal {
                    count: 0,
                    score: 0.0,
                    sessions: BTreeSet::new(),
                    first_seen: at_millis,
                    last_seen: at_millis,
                },
                last_seen_at: Instant::now(),
            });
        tracked.signal.count += 1;
        tracked.signal.score += score;
        tracked.signal.sessions.insert(session.clone());
        tracked.signal.last_seen = at_millis;
        tracked.last_seen_at = Instant::now();

        let event = EvidenceEvent::Add {
            src,
            dst,
            label: label.to_string(),
            score,
            signal,
            session,
            at_millis,
        };
        (tracked.signal.clone(), event)
    }

    /// Current evidence for a triple, if accumulating.
    pub fn get(&self, src: NodeId, dst: NodeId, label: &str) -> Option<EvidenceSignal> {
        self.entries
            .read()
            .get(&(src, dst, label.to_string()))
            .map(|t| t.signal.clone())
    }

    /// Clear a triple (on materialization), returning whether anything
    /// was cleared.
    pub fn clear(&self, src: NodeId, dst: NodeId, label: &str) -> bool {
        self.entries
            .write()
            .remove(&(src, dst, label.to_string()))
            .is_some()
    }

    /// Evict triples whose latest signal is older than `max_age`
    /// (Accumulating → Silent without materialization). Returns the
    /// evicted triples.
    pub fn evict_expired(&self, max_age: Duration) -> Vec<(NodeId, NodeId, String)> {
        let mut entries = self.entries.write();
        let expired: Vec<(NodeId, NodeId, String)> = entries
            .iter()
            .filter(|(_, t)| t.last_seen_at.elapsed() > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }

    /// Number of accumulating triples.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is accumulating.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
