//! Inference engine configuration
//!
//! Per-label tables with explicit defaults for labels not named in them;
//! deploys override both via the config file. Feature flags switch each
//! gate's machinery on; auto-integration flags decide whether
//! `process_suggestion` consults it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Thresholds the evidence gate applies before materializing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvidenceThresholds {
    /// Minimum accumulated signal count.
    pub min_count: u64,
    /// Minimum accumulated score.
    pub min_score: f64,
    /// Minimum distinct session count.
    pub min_sessions: u64,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        EvidenceThresholds {
            min_count: 3,
            min_score: 0.5,
            min_sessions: 2,
        }
    }
}

impl EvidenceThresholds {
    /// Scale by a trust multiplier (rounding counts up).
    pub fn scaled(&self, factor: f64) -> Self {
        EvidenceThresholds {
            min_count: ((self.min_count as f64) * factor).ceil() as u64,
            min_score: self.min_score * factor,
            min_sessions: ((self.min_sessions as f64) * factor).ceil() as u64,
        }
    }
}

/// Inference engine configuration.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    // Feature flags.
    /// Cooldown gate machinery on/off.
    pub cooldown_enabled: bool,
    /// Evidence gate machinery on/off.
    pub evidence_enabled: bool,
    /// Provenance logging on/off.
    pub provenance_enabled: bool,
    /// Per-node rule gate machinery on/off.
    pub node_rules_enabled: bool,
    /// Edge decay sweeps on/off.
    pub decay_enabled: bool,

    // Auto-integration flags: whether process_suggestion consults each
    // gate. The stores remain directly accessible regardless.
    /// Consult cooldown during `process_suggestion`.
    pub auto_cooldown: bool,
    /// Consult evidence during `process_suggestion`.
    pub auto_evidence: bool,
    /// Append provenance during `process_suggestion`.
    pub auto_provenance: bool,
    /// Consult node rules during `process_suggestion`.
    pub auto_node_rules: bool,

    /// Per-label cooldowns. Labels absent here use `default_cooldown`.
    pub cooldowns: HashMap<String, Duration>,
    /// Cooldown for labels without an entry.
    pub default_cooldown: Duration,

    /// Per-label evidence thresholds; absent labels use the default.
    pub thresholds: HashMap<String, EvidenceThresholds>,
    /// Thresholds for labels without an entry.
    pub default_thresholds: EvidenceThresholds,

    /// Evidence older than this is evicted un-materialized.
    pub evidence_max_age: Duration,

    /// Per-label per-sweep decay factors; absent labels use the default.
    pub decay_factors: HashMap<String, f64>,
    /// Decay factor for labels without an entry.
    pub default_decay_factor: f64,
    /// Edges decaying below this score are archived (soft-deleted).
    pub archive_threshold: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let mut cooldowns = HashMap::new();
        cooldowns.insert("relates_to".to_string(), Duration::from_secs(5 * 60));
        cooldowns.insert("similar_to".to_string(), Duration::from_secs(10 * 60));
        cooldowns.insert("coaccess".to_string(), Duration::from_secs(60));
        cooldowns.insert("topology".to_string(), Duration::from_secs(15 * 60));

        let mut decay_factors = HashMap::new();
        decay_factors.insert("coaccess".to_string(), 0.90);
        decay_factors.insert("similar_to".to_string(), 0.95);

        InferenceConfig {
            cooldown_enabled: true,
            evidence_enabled: true,
            provenance_enabled: true,
            node_rules_enabled: true,
            decay_enabled: true,
            auto_cooldown: true,
            auto_evidence: true,
            auto_provenance: true,
            auto_node_rules: true,
            cooldowns,
            default_cooldown: Duration::from_secs(5 * 60),
            thresholds: HashMap::new(),
            default_thresholds: EvidenceThresholds::default(),
            evidence_max_age: Duration::from_secs(24 * 3600),
            decay_factors,
            default_decay_factor: 0.98,
            archive_threshold: 0.05,
        }
    }
}

impl InferenceConfig {
    /// Cooldown for a label, falling back to the configured default.
    pub fn cooldown(&self, label: &str) -> Duration {
        self.cooldowns
            .get(label)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    /// Evidence thresholds for a label, falling back to the default.
    pub fn thresholds(&self, label: &str) -> EvidenceThresholds {
        self.thresholds
            .get(label)
            .copied()
            .unwrap_or(self.default_thresholds)
    }

    /// Decay factor for a label, falling back to the default.
    pub fn decay_factor(&self, label: &str) -> f64 {
        self.decay_factors
            .get(label)
            .copied()
            .unwrap_or(self.default_decay_factor)
    }
}
