//! Hot standby (two-node pairing)
//!
//! The primary streams WAL batches; the standby applies them and acks
//! with "received" or "persisted" semantics. Failover: after missing
//! heartbeats for longer than the configured timeout, the standby fences
//! the old primary (best-effort) and promotes itself — but only when
//! `allow_unarbitrated_failover` is set. Two nodes have no quorum;
//! without an external arbiter a network partition would otherwise
//! produce two writable primaries, so the default refuses automatic
//! promotion and waits for an operator.
//!
//! Both ends are deterministic state machines; the caller owns the
//! transport and applies returned entries to its own storage.

use crate::config::AckMode;
use crate::wire::Message;
use nornic_core::{now_millis, NornicError, Result};
use nornic_durability::WalEntry;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Primary-side replication state.
pub struct PrimaryState {
    node_id: String,
    ack_mode: AckMode,
    heartbeat_interval: Duration,
    last_heartbeat_sent: Instant,
    /// Highest sequence shipped to the standby.
    shipped_seq: u64,
    /// Highest sequence the standby confirmed received.
    received_seq: u64,
    /// Highest sequence the standby confirmed persisted.
    persisted_seq: u64,
    /// Unacked-entry count beyond which writes fail with
    /// `ReplicaLagExceeded`. `None` = unbounded.
    max_lag: Option<u64>,
    /// Set when a fence message arrived: stop accepting writes.
    fenced: bool,
}

impl PrimaryState {
    /// New primary.
    pub fn new(node_id: impl Into<String>, ack_mode: AckMode, heartbeat_interval: Duration) -> Self {
        PrimaryState {
            node_id: node_id.into(),
            ack_mode,
            heartbeat_interval,
            last_heartbeat_sent: Instant::now(),
            shipped_seq: 0,
            received_seq: 0,
            persisted_seq: 0,
            max_lag: None,
            fenced: false,
        }
    }

    /// Builder: cap the unacked-entry backlog.
    pub fn with_max_lag(mut self, max_lag: u64) -> Self {
        self.max_lag = Some(max_lag);
        self
    }

    /// Whether the primary still accepts client writes.
    pub fn accepts_writes(&self) -> bool {
        !self.fenced
    }

    /// Highest sequence shipped to the standby so far.
    pub fn shipped_seq(&self) -> u64 {
        self.shipped_seq
    }

    /// Package a WAL batch for shipment. Returns `None` for an empty
    /// batch.
    pub fn ship(&mut self, entries: Vec<WalEntry>) -> Option<Message> {
        let last = entries.last()?.seq;
        self.shipped_seq = self.shipped_seq.max(last);
        Some(Message::WalBatch {
            from: self.node_id.clone(),
            entries,
            region: String::new(),
            sent_at_millis: now_millis(),
        })
    }

    /// Process the standby's ack.
    pub fn on_ack(&mut self, message: &Message) {
        if let Message::AppendResponse {
            success: true,
            match_index,
            persisted,
            ..
        } = message
        {
            self.received_seq = self.received_seq.max(*match_index);
            if *persisted {
                self.persisted_seq = self.persisted_seq.max(*match_index);
            }
        }
    }

    /// Process a fence order from a promoting standby. After this the
    /// primary refuses writes until an operator intervenes.
    pub fn on_fence(&mut self, from: &str, reason: &str) {
        warn!(node = %self.node_id, from, reason, "fenced: refusing further writes");
        self.fenced = true;
    }

    /// Whether the client may be acknowledged for `seq` under the
    /// configured semantics.
    ///
    /// - `Async`: immediately (the batch is buffered locally).
    /// - `SemiSync`: once the standby confirmed receipt.
    /// - `Sync`: once the standby confirmed persistence.
    pub fn client_ackable(&self, seq: u64) -> bool {
        match self.ack_mode {
            AckMode::Async => true,
            AckMode::SemiSync => self.received_seq >= seq,
            AckMode::Sync => self.persisted_seq >= seq,
        }
    }

    /// Emit a heartbeat when one is due.
    pub fn tick(&mut self, now: Instant) -> Option<Message> {
        if now.duration_since(self.last_heartbeat_sent) >= self.heartbeat_interval {
            self.last_heartbeat_sent = now;
            Some(Message::Heartbeat {
                term: 0,
                from: self.node_id.clone(),
                commit_index: self.shipped_seq,
            })
        } else {
            None
        }
    }

    /// Replication lag in entries, by the strongest ack received.
    pub fn lag(&self) -> u64 {
        self.shipped_seq.saturating_sub(match self.ack_mode {
            AckMode::Sync => self.persisted_seq,
            _ => self.received_seq,
        })
    }

    /// Gate a write against the configured lag cap. A backlog beyond the
    /// cap surfaces `ReplicaLagExceeded` instead of letting the standby
    /// fall arbitrarily far behind.
    pub fn check_lag(&self) -> Result<()> {
        let lag = self.lag();
        match self.max_lag {
            Some(max) if lag > max => Err(NornicError::ReplicaLagExceeded { lag_entries: lag }),
            _ => Ok(()),
        }
    }
}

/// What the standby decided about failover.
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverDecision {
    /// Heartbeats are healthy; nothing to do.
    Healthy,
    /// Heartbeats missed, but no external arbiter authorized automatic
    /// promotion; waiting for an operator.
    RefusedNoArbiter,
    /// Failover initiated: send these messages (fence, then promote) and
    /// become writable.
    Promote(Vec<Message>),
}

/// Standby-side replication state.
pub struct StandbyState {
    node_id: String,
    failover_timeout: Duration,
    allow_unarbitrated_failover: bool,
    last_heartbeat: Instant,
    /// Highest sequence applied locally.
    applied_seq: u64,
    /// Highest sequence the primary reports having shipped.
    primary_shipped_seq: u64,
    /// Applied-vs-shipped gap that counts as a lost primary. `None` =
    /// heartbeats alone decide.
    lag_threshold: Option<u64>,
    promoted: bool,
}

impl StandbyState {
    /// New standby, healthy as of `now`.
    pub fn new(
        node_id: impl Into<String>,
        failover_timeout: Duration,
        allow_unarbitrated_failover: bool,
        now: Instant,
    ) -> Self {
        StandbyState {
            node_id: node_id.into(),
            failover_timeout,
            allow_unarbitrated_failover,
            last_heartbeat: now,
            applied_seq: 0,
            primary_shipped_seq: 0,
            lag_threshold: None,
            promoted: false,
        }
    }

    /// Builder: fail over when the primary reports shipping `threshold`
    /// more entries than have arrived here.
    pub fn with_lag_threshold(mut self, threshold: u64) -> Self {
        self.lag_threshold = Some(threshold);
        self
    }

    /// Whether this node has promoted itself to writable primary.
    pub fn is_promoted(&self) -> bool {
        self.promoted
    }

    /// Highest sequence applied from the primary's stream.
    pub fn applied_seq(&self) -> u64 {
        self.applied_seq
    }

    /// Entries the primary claims to have shipped that never arrived.
    pub fn lag(&self) -> u64 {
        self.primary_shipped_seq.saturating_sub(self.applied_seq)
    }

    /// Accept a WAL batch. The caller applies `entries` to storage (and
    /// persists them) before sending the returned ack; the `persisted`
    /// flag in the ack should reflect what the caller actually did.
    ///
    /// Primary→standby application order is preserved: entries arrive in
    /// sequence order and out-of-order batches are ignored by the
    /// monotonic `applied_seq` guard.
    pub fn on_wal_batch(
        &mut self,
        entries: &[WalEntry],
        persisted: bool,
        now: Instant,
    ) -> Option<Message> {
        self.last_heartbeat = now; // batches are liveness too
        let last = entries.last()?.seq;
        self.applied_seq = self.applied_seq.max(last);
        Some(Message::AppendResponse {
            term: 0,
            success: true,
            node_id: self.node_id.clone(),
            match_index: self.applied_seq,
            persisted,
        })
    }

    /// Record a heartbeat. `primary_shipped_seq` is the shipped high
    /// watermark the primary embeds in its heartbeats; the gap between
    /// it and what arrived here is the observed replication lag.
    pub fn on_heartbeat(&mut self, now: Instant, primary_shipped_seq: u64) {
        self.last_heartbeat = now;
        self.primary_shipped_seq = self.primary_shipped_seq.max(primary_shipped_seq);
    }

    /// Check the failover triggers: missed heartbeats, or replication
    /// lag past the threshold (the hot-standby reaction to
    /// `ReplicaLagExceeded` — a primary that ships without being heard
    /// is as lost as one that stops shipping).
    pub fn check_failover(&mut self, now: Instant) -> FailoverDecision {
        if self.promoted {
            return FailoverDecision::Healthy;
        }
        let heartbeat_stale = now.duration_since(self.last_heartbeat) > self.failover_timeout;
        let lag_exceeded = self.lag_threshold.map_or(false, |t| self.lag() > t);
        if !heartbeat_stale && !lag_exceeded {
            return FailoverDecision::Healthy;
        }
        if !self.allow_unarbitrated_failover {
            warn!(
                node = %self.node_id,
                heartbeat_stale,
                lag_exceeded,
                "primary unhealthy but no arbiter configured; refusing automatic failover"
            );
            return FailoverDecision::RefusedNoArbiter;
        }

        // Fence first (best-effort), then announce promotion.
        self.promoted = true;
        let reason = if heartbeat_stale {
            "heartbeat timeout"
        } else {
            "replica lag exceeded"
        };
        info!(node = %self.node_id, reason, "standby promoting itself");
        FailoverDecision::Promote(vec![
            Message::Fence {
                from: self.node_id.clone(),
                reason: reason.to_string(),
            },
            Message::Promote {
                from: self.node_id.clone(),
                term: 0,
            },
        ])
    }
}
