//! Per-node access tracking
//!
//! `record_access` feeds the inter-access interval (as a capped rate)
//! through the node's Kalman filter, detects session boundaries, and
//! maintains ring-buffer history plus hour/day histograms. The tracked
//! set is bounded: beyond `max_tracked_nodes` the least-recently-accessed
//! tracker is evicted.

use crate::kalman::KalmanFilter;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use nornic_core::{NodeId, TimestampMillis};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Rate cap: intervals below 1 ms count as 1000 accesses/sec.
const MAX_RATE_PER_SEC: f64 = 1000.0;

/// How far the filter is run forward for a prediction.
const PREDICT_STEPS: u32 = 1;

/// Prediction clamp bounds.
const MIN_PREDICT_SECS: f64 = 1.0;
const MAX_PREDICT_SECS: f64 = 30.0 * 86_400.0;

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Bound on the tracked-node set; LRU eviction beyond it.
    pub max_tracked_nodes: usize,
    /// Minimum observations before predictions are offered.
    pub min_accesses_for_prediction: u64,
    /// Gap that starts a new session.
    pub session_timeout_secs: f64,
    /// Relative velocity change that starts a new session (0.5 = 50%).
    pub velocity_change_threshold: f64,
    /// Kalman process noise.
    pub process_noise: f64,
    /// Kalman measurement noise.
    pub measurement_noise: f64,
    /// Ring-buffer capacity for recent access timestamps.
    pub history_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            max_tracked_nodes: 10_000,
            min_accesses_for_prediction: 3,
            session_timeout_secs: 300.0,
            velocity_change_threshold: 0.5,
            process_noise: 0.01,
            measurement_noise: 0.1,
            history_capacity: 64,
        }
    }
}

/// Access trend derived from the filter's velocity sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    /// Access rate is increasing.
    Heating,
    /// Access rate is decreasing.
    Cooling,
    /// No significant change.
    Stable,
}

/// Per-node access state.
#[derive(Debug)]
pub struct AccessHistory {
    /// Recent access timestamps, oldest first, bounded.
    pub recent: VecDeque<TimestampMillis>,
    /// Total accesses ever recorded.
    pub total_count: u64,
    /// First access (ms epoch).
    pub first_access: TimestampMillis,
    /// Last access (ms epoch).
    pub last_access: TimestampMillis,
    /// Accesses per hour of day (UTC).
    pub hour_histogram: [u64; 24],
    /// Accesses per day of week (Monday = 0).
    pub day_histogram: [u64; 7],
    /// Rate estimator.
    pub filter: KalmanFilter,
    /// When the current session started.
    pub session_start: TimestampMillis,
    /// Sessions observed, including the current one.
    pub session_count: u64,
}

impl AccessHistory {
    fn new(t: TimestampMillis, config: &TrackerConfig) -> Self {
        let mut history = AccessHistory {
            recent: VecDeque::with_capacity(config.history_capacity),
            total_count: 0,
            first_access: t,
            last_access: t,
            hour_histogram: [0; 24],
            day_histogram: [0; 7],
            filter: KalmanFilter::new(config.process_noise, config.measurement_noise),
            session_start: t,
            session_count: 1,
        };
        history.push(t, config.history_capacity);
        history
    }

    fn push(&mut self, t: TimestampMillis, capacity: usize) {
        if self.recent.len() == capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(t);
        self.total_count += 1;
        self.last_access = t;
        if let Some(dt) = Utc.timestamp_millis_opt(t).single() {
            self.hour_histogram[dt.hour() as usize] += 1;
            self.day_histogram[dt.weekday().num_days_from_monday() as usize] += 1;
        }
    }
}

/// A next-access prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted next access (ms epoch).
    pub predicted_time: TimestampMillis,
    /// Seconds from the last access to the predicted one, clamped to
    /// `[1 s, 30 d]`.
    pub seconds_until: f64,
    /// Confidence in `[0, 1)`: grows with observations, shrinks with
    /// filter uncertainty.
    pub confidence: f64,
    /// Direction of the access-rate trend.
    pub trend: Trend,
}

/// The bounded tracker map.
pub struct AccessTracker {
    config: TrackerConfig,
    nodes: RwLock<FxHashMap<NodeId, AccessHistory>>,
}

impl AccessTracker {
    /// New tracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Self {
        AccessTracker {
            config,
            nodes: RwLock::new(FxHashMap::default()),
        }
    }

    /// Record an access at wall-clock time `t`.
    pub fn record_access(&self, node: NodeId, t: TimestampMillis) {
        let mut nodes = self.nodes.write();

        if let Some(history) = nodes.get_mut(&node) {
            let interval_secs = (t - history.last_access).max(0) as f64 / 1000.0;
            let rate = if interval_secs <= 0.001 {
                MAX_RATE_PER_SEC
            } else {
                (1.0 / interval_secs).min(MAX_RATE_PER_SEC)
            };

            let old_velocity = history.filter.velocity();
            history.filter.process(rate);
            let new_velocity = history.filter.velocity();

            // Session boundaries: a long gap, or an abrupt rate-of-change
            // swing relative to the previous velocity.
            let gap_boundary = interval_secs > self.config.session_timeout_secs;
            let velocity_boundary = old_velocity.abs() > 1e-6
                && ((new_velocity - old_velocity).abs() / old_velocity.abs())
                    > self.config.velocity_change_threshold;
            if gap_boundary || velocity_boundary {
                history.session_count += 1;
                history.session_start = t;
                debug!(node = %node, gap_boundary, velocity_boundary, "session boundary");
            }

            history.push(t, self.config.history_capacity);
        } else {
            if nodes.len() >= self.config.max_tracked_nodes {
                // Evict the least-recently-accessed tracker.
                if let Some(victim) = nodes
                    .iter()
                    .min_by_key(|(_, h)| h.last_access)
                    .map(|(id, _)| *id)
                {
                    nodes.remove(&victim);
                    debug!(node = %victim, "tracker evicted");
                }
            }
            nodes.insert(node, AccessHistory::new(t, &self.config));
        }
    }

    /// Record an access at the current wall-clock time.
    pub fn record_access_now(&self, node: NodeId) {
        self.record_access(node, nornic_core::now_millis());
    }

    /// Predict the node's next access. `None` until the node has at
    /// least `min_accesses_for_prediction` observations.
    pub fn predict_next_access(&self, node: NodeId) -> Option<Prediction> {
        let nodes = self.nodes.read();
        let history = nodes.get(&node)?;
        if history.filter.observations() < self.config.min_accesses_for_prediction {
            return None;
        }

        let projected_rate = history.filter.predict_ahead(PREDICT_STEPS);
        let seconds_until = if projected_rate <= 0.0 {
            MAX_PREDICT_SECS
        } else {
            (1.0 / projected_rate).clamp(MIN_PREDICT_SECS, MAX_PREDICT_SECS)
        };

        let n = history.filter.observations() as f64;
        let confidence = (n / (n + 5.0)) / (1.0 + history.filter.uncertainty().sqrt());

        let velocity = history.filter.velocity();
        let trend = if velocity > 1e-3 {
            Trend::Heating
        } else if velocity < -1e-3 {
            Trend::Cooling
        } else {
            Trend::Stable
        };

        Some(Prediction {
            predicted_time: history.last_access + (seconds_until * 1000.0) as i64,
            seconds_until,
            confidence,
            trend,
        })
    }

    /// Nodes sorted by signed velocity, hottest (most positive) first.
    pub fn hottest(&self, limit: usize) -> Vec<(NodeId, f64)> {
        let mut entries = self.velocities();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(limit);
        entries
    }

    /// Nodes sorted by signed velocity, coldest (most negative) first.
    pub fn coldest(&self, limit: usize) -> Vec<(NodeId, f64)> {
        let mut entries = self.velocities();
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(limit);
        entries
    }

    fn velocities(&self) -> Vec<(NodeId, f64)> {
        self.nodes
            .read()
            .iter()
            .map(|(id, h)| (*id, h.filter.velocity()))
            .collect()
    }

    /// Session count for a node, if tracked.
    pub fn session_count(&self, node: NodeId) -> Option<u64> {
        self.nodes.read().get(&node).map(|h| h.session_count)
    }

    /// Total recorded accesses for a node, if tracked.
    pub fn access_count(&self, node: NodeId) -> Option<u64> {
        self.nodes.read().get(&node).map(|h| h.total_count)
    }

    /// Number of tracked nodes.
    pub fn tracked_nodes(&self) -> usize {
        self.nodes.read().len()
    }

    /// Hour-of-day histogram for a node, if tracked.
    pub fn hour_histogram(&self, node: NodeId) -> Option<[u64; 24]> {
        self.nodes.read().get(&node).map(|h| h.hour_histogram)
    }

    /// Drop a node's tracker (e.g. after node deletion).
    pub fn forget(&self, node: NodeId) {
        self.nodes.write().remove(&node);
    }
}
