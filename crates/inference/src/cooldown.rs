//! Cooldown table
//!
//! Keyed by (src, dst, label): the last time the inference path
//! materialized that triple. Gating compares against a monotonic clock,
//! so wall-clock jumps cannot re-open or extend a cooldown. Persistence
//! stores wall timestamps and converts the elapsed portion back to the
//! monotonic domain on reload.

use nornic_core::{now_millis, NodeId, TimestampMillis};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Persisted cooldown mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownMark {
    /// Source node.
    pub src: NodeId,
    /// Target node.
    pub dst: NodeId,
    /// Edge label.
    pub label: String,
    /// Wall-clock materialization time (ms epoch), for persistence and
    /// observability only.
    pub at_millis: TimestampMillis,
}

#[derive(Clone, Copy)]
struct Entry {
    at: Instant,
    at_millis: TimestampMillis,
}

/// The cooldown table.
pub struct CooldownTable {
    entries: RwLock<HashMap<(NodeId, NodeId, String), Entry>>,
}

impl Default for CooldownTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownTable {
    /// Empty table.
    pub fn new() -> Self {
        CooldownTable {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the triple is still cooling down for the given duration.
    pub fn is_blocked(&self, src: NodeId, dst: NodeId, label: &str, cooldown: Duration) -> bool {
        let entries = self.entries.read();
        match entries.get(&(src, dst, label.to_string())) {
            Some(entry) => entry.at.elapsed() < cooldown,
            None => false,
        }
    }

    /// Time left on the cooldown, if any.
    pub fn remaining(
        &self,
        src: NodeId,
        dst: NodeId,
        label: &str,
        cooldown: Duration,
    ) -> Option<Duration> {
        let entries = self.entries.read();
        entries
            .get(&(src, dst, label.to_string()))
            .and_then(|entry| cooldown.checked_sub(entry.at.elapsed()))
            .filter(|d| !d.is_zero())
    }

    /// Record a materialization at "now", returning the persistable mark.
    pub fn mark(&self, src: NodeId, dst: NodeId, label: &str) -> CooldownMark {
        let at_millis = now_millis();
        self.entries.write().insert(
            (src, dst, label.to_string()),
            Entry {
                at: Instant::now(),
                at_millis,
            },
        );
        CooldownMark {
            src,
            dst,
            label: label.to_string(),
            at_millis,
        }
    }

    /// Restore a persisted mark, mapping its wall-clock age back onto the
    /// monotonic clock. Marks from the future (clock skew) count as
    /// just-now.
    pub fn restore(&self, mark: &CooldownMark) {
        let elapsed_ms = (now_millis() - mark.at_millis).max(0) as u64;
        let at = Instant::now()
            .checked_sub(Duration::from_millis(elapsed_ms))
            .unwrap_or_else(Instant::now);
        self.entries.write().insert(
            (mark.src, mark.dst, mark.label.clone()),
            Entry {
                at,
                at_millis: mark.at_millis,
            },
        );
    }

    /// Last materialization wall time for a triple, if marked.
    pub fn last_materialized(
        &self,
        src: NodeId,
        dst: NodeId,
        label: &str,
    ) -> Option<TimestampMillis> {
        self.entries
            .read()
            .get(&(src, dst, label.to_string()))
            .map(|e| e.at_millis)
    }

    /// Number of tracked triples.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop marks whose cooldown (by the caller's longest configured
    /// duration) has long expired. Bounds table growth.
    pub fn prune_older_than(&self, age: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.at.elapsed() < age);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn triple() -> (NodeId, NodeId, &'static str) {
        (NodeId::new(1), NodeId::new(2), "relates_to")
    }

    #[test]
    fn test_unmarked_not_blocked() {
        let table = CooldownTable::new();
        let (src, dst, label) = triple();
        assert!(!table.is_blocked(src, dst, label, COOLDOWN));
        assert!(table.remaining(src, dst, label, COOLDOWN).is_none());
    }

    #[test]
    fn test_marked_blocks_immediately() {
        let table = CooldownTable::new();
        let (src, dst, label) = triple();
        table.mark(src, dst, label);
        assert!(table.is_blocked(src, dst, label, COOLDOWN));
        let remaining = table.remaining(src, dst, label, COOLDOWN).unwrap();
        assert!(remaining <= COOLDOWN);
        assert!(remaining > Duration::from_secs(295));
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let table = CooldownTable::new();
        let (src, dst, label) = triple();
        table.mark(src, dst, label);
        assert!(!table.is_blocked(src, dst, label, Duration::ZERO));
    }

    #[test]
    fn test_triples_are_independent() {
        let table = CooldownTable::new();
        let (src, dst, label) = triple();
        table.mark(src, dst, label);
        assert!(!table.is_blocked(dst, src, label, COOLDOWN));
        assert!(!table.is_blocked(src, dst, "other_label", COOLDOWN));
    }

    #[test]
    fn test_restore_preserves_elapsed_time() {
        let table = CooldownTable::new();
        let (src, dst, label) = triple();
        // A mark from 299 s ago: 1 s left on a 300 s cooldown.
        let mark = CooldownMark {
            src,
            dst,
            label: label.to_string(),
            at_millis: now_millis() - 299_000,
        };
        table.restore(&mark);
        assert!(table.is_blocked(src, dst, label, COOLDOWN));
        let remaining = table.remaining(src, dst, label, COOLDOWN).unwrap();
        assert!(remaining <= Duration::from_secs(2));

        // A mark from 301 s ago: expired.
        let old_mark = CooldownMark {
            src,
            dst,
            label: label.to_string(),
            at_millis: now_millis() - 301_000,
        };
        table.restore(&old_mark);
        assert!(!table.is_blocked(src, dst, label, COOLDOWN));
    }

    #[test]
    fn test_prune() {
        let table = CooldownTable::new();
        let (src, dst, label) = triple();
        table.mark(src, dst, label);
        assert_eq!(table.prune_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(table.prune_older_than(Duration::ZERO), 1);
        assert!(table.is_empty());
    }
}
