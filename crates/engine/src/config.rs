//! Database configuration via `nornicdb.toml`
//!
//! A config file in the data directory replaces builder sprawl. On first
//! open, a default `nornicdb.toml` is created with commented defaults.
//! To change settings, edit the file and restart — same model as Redis.

use nornic_core::{NornicError, Result};
use nornic_durability::SyncMode;
use nornic_inference::InferenceConfig;
use nornic_replication::{
    AckMode, ConflictResolution, ReplicationConfig, ReplicationMode, StandbyRole,
};
use nornic_temporal::TrackerConfig;
use nornic_vector::{InitMethod, KMeansConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "nornicdb.toml";

fn default_true() -> bool {
    true
}

/// `[durability]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurabilitySection {
    /// `"immediate"`, `"batch"`, or `"none"`.
    #[serde(default = "DurabilitySection::default_sync_mode")]
    pub sync_mode: String,
    /// Batch-mode fsync interval in milliseconds.
    #[serde(default = "DurabilitySection::default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Async write-behind: mutations return once buffered.
    #[serde(default)]
    pub async_writes: bool,
    /// Write-behind flush cadence in milliseconds.
    #[serde(default = "DurabilitySection::default_write_behind_ms")]
    pub write_behind_interval_ms: u64,
    /// Take a snapshot after this many WAL entries (0 = manual only).
    #[serde(default = "DurabilitySection::default_snapshot_every")]
    pub snapshot_every_entries: u64,
}

impl DurabilitySection {
    fn default_sync_mode() -> String {
        "batch".to_string()
    }
    fn default_flush_interval_ms() -> u64 {
        100
    }
    fn default_write_behind_ms() -> u64 {
        50
    }
    fn default_snapshot_every() -> u64 {
        10_000
    }

    /// Parse the sync-mode string.
    pub fn parse_sync_mode(&self) -> Result<SyncMode> {
        match self.sync_mode.as_str() {
            "immediate" => Ok(SyncMode::Immediate),
            "batch" => Ok(SyncMode::Batch {
                interval: Duration::from_millis(self.flush_interval_ms),
            }),
            "none" => Ok(SyncMode::None),
            other => Err(NornicError::invalid_input(format!(
                "invalid sync_mode {:?}: expected \"immediate\", \"batch\", or \"none\"",
                other
            ))),
        }
    }
}

impl Default for DurabilitySection {
    fn default() -> Self {
        DurabilitySection {
            sync_mode: Self::default_sync_mode(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            async_writes: false,
            write_behind_interval_ms: Self::default_write_behind_ms(),
            snapshot_every_entries: Self::default_snapshot_every(),
        }
    }
}

/// `[replication]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSection {
    /// `"standalone"`, `"hot_standby"`, `"raft"`, or `"multi_region"`.
    #[serde(default = "ReplicationSection::default_mode")]
    pub mode: String,
    /// Node identity within the cluster.
    #[serde(default = "ReplicationSection::default_node_id")]
    pub node_id: String,
    /// Cluster-port bind address.
    #[serde(default = "ReplicationSection::default_bind")]
    pub bind_addr: String,
    /// Address peers dial (defaults to `bind_addr`).
    #[serde(default)]
    pub advertise_addr: String,
    /// `id = address` peer table.
    #[serde(default)]
    pub peers: HashMap<String, String>,
    /// Election timeout bounds in milliseconds.
    #[serde(default = "ReplicationSection::default_election_min_ms")]
    pub election_timeout_min_ms: u64,
    /// Upper bound in milliseconds.
    #[serde(default = "ReplicationSection::default_election_max_ms")]
    pub election_timeout_max_ms: u64,
    /// Heartbeat cadence in milliseconds.
    #[serde(default = "ReplicationSection::default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    /// Raft log entries kept before snapshot compaction.
    #[serde(default = "ReplicationSection::default_snapshot_threshold")]
    pub snapshot_threshold: usize,
    /// Hot-standby ack mode: `"async"`, `"semi_sync"`, `"sync"`.
    #[serde(default = "ReplicationSection::default_ack_mode")]
    pub ack_mode: String,
    /// Hot-standby role: `"primary"` or `"standby"`.
    #[serde(default = "ReplicationSection::default_role")]
    pub role: String,
    /// Unacked-entry backlog before writes fail with replica-lag errors
    /// and the standby treats the stream as lost (0 = unbounded).
    #[serde(default)]
    pub max_lag_entries: u64,
    /// Missed-heartbeat window before failover, in milliseconds.
    #[serde(default = "ReplicationSection::default_failover_ms")]
    pub failover_timeout_ms: u64,
    /// Permit standby self-promotion without an external arbiter.
    #[serde(default)]
    pub allow_unarbitrated_failover: bool,
    /// Region id (multi-region mode).
    #[serde(default)]
    pub region: String,
    /// Cross-region conflict handling: `"last_write_wins"` or `"manual"`.
    #[serde(default = "ReplicationSection::default_conflict")]
    pub conflict_resolution: String,
}

impl ReplicationSection {
    fn default_mode() -> String {
        "standalone".to_string()
    }
    fn default_node_id() -> String {
        "node-1".to_string()
    }
    fn default_bind() -> String {
        "127.0.0.1:7600".to_string()
    }
    fn default_election_min_ms() -> u64 {
        150
    }
    fn default_election_max_ms() -> u64 {
        300
    }
    fn default_heartbeat_ms() -> u64 {
        50
    }
    fn default_snapshot_threshold() -> usize {
        10_000
    }
    fn default_ack_mode() -> String {
        "semi_sync".to_string()
    }
    fn default_role() -> String {
        "primary".to_string()
    }
    fn default_conflict() -> String {
        "last_write_wins".to_string()
    }
    fn default_failover_ms() -> u64 {
        5_000
    }

    /// Resolve into the replication layer's config.
    pub fn resolve(&self) -> Result<ReplicationConfig> {
        let mode = match self.mode.as_str() {
            "standalone" => ReplicationMode::Standalone,
            "hot_standby" => ReplicationMode::HotStandby,
            "raft" => ReplicationMode::Raft,
            "multi_region" => ReplicationMode::MultiRegion,
            other => {
                return Err(NornicError::invalid_input(format!(
                    "invalid replication mode {:?}",
                    other
                )))
            }
        };
        let ack_mode = match self.ack_mode.as_str() {
            "async" => AckMode::Async,
            "semi_sync" => AckMode::SemiSync,
            "sync" => AckMode::Sync,
            other => {
                return Err(NornicError::invalid_input(format!(
                    "invalid ack_mode {:?}",
                    other
                )))
            }
        };
        let role = match self.role.as_str() {
            "primary" => StandbyRole::Primary,
            "standby" => StandbyRole::Standby,
            other => {
                return Err(NornicError::invalid_input(format!(
                    "invalid replication role {:?}: expected \"primary\" or \"standby\"",
                    other
                )))
            }
        };
        let conflict = match self.conflict_resolution.as_str() {
            "last_write_wins" => ConflictResolution::LastWriteWins,
            "manual" => ConflictResolution::Manual,
            other => {
                return Err(NornicError::invalid_input(format!(
                    "invalid conflict_resolution {:?}: expected \"last_write_wins\" or \"manual\"",
                    other
                )))
            }
        };
        Ok(ReplicationConfig {
            mode,
            node_id: self.node_id.clone(),
            bind_addr: self.bind_addr.clone(),
            advertise_addr: if self.advertise_addr.is_empty() {
                self.bind_addr.clone()
            } else {
                self.advertise_addr.clone()
            },
            peers: self.peers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            election_timeout_min: Duration::from_millis(self.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(self.election_timeout_max_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            snapshot_threshold: self.snapshot_threshold,
            ack_mode,
            role,
            max_lag_entries: self.max_lag_entries,
            failover_timeout: Duration::from_millis(self.failover_timeout_ms),
            allow_unarbitrated_failover: self.allow_unarbitrated_failover,
            region: self.region.clone(),
            conflict,
        })
    }
}

impl Default for ReplicationSection {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

/// `[inference]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSection {
    /// Cooldown gate on/off.
    #[serde(default = "default_true")]
    pub cooldown: bool,
    /// Evidence gate on/off.
    #[serde(default = "default_true")]
    pub evidence: bool,
    /// Provenance logging on/off.
    #[serde(default = "default_true")]
    pub provenance: bool,
    /// Per-node rules on/off.
    #[serde(default = "default_true")]
    pub node_rules: bool,
    /// Edge decay sweeps on/off.
    #[serde(default = "default_true")]
    pub decay: bool,
    /// Auto-integration: consult cooldown in `process_suggestion`.
    #[serde(default = "default_true")]
    pub auto_cooldown: bool,
    /// Auto-integration: consult evidence.
    #[serde(default = "default_true")]
    pub auto_evidence: bool,
    /// Auto-integration: append provenance.
    #[serde(default = "default_true")]
    pub auto_provenance: bool,
    /// Auto-integration: consult node rules.
    #[serde(default = "default_true")]
    pub auto_node_rules: bool,
    /// `label = seconds` cooldown overrides.
    #[serde(default)]
    pub cooldown_secs: HashMap<String, u64>,
    /// Cooldown for labels without an override, in seconds.
    #[serde(default = "InferenceSection::default_cooldown_secs")]
    pub default_cooldown_secs: u64,
    /// Evidence max age in seconds.
    #[serde(default = "InferenceSection::default_evidence_max_age")]
    pub evidence_max_age_secs: u64,
    /// Archive threshold for decayed edges.
    #[serde(default = "InferenceSection::default_archive_threshold")]
    pub archive_threshold: f64,
    /// Decay sweep cadence in seconds.
    #[serde(default = "InferenceSection::default_decay_interval")]
    pub decay_interval_secs: u64,
}

impl InferenceSection {
    fn default_cooldown_secs() -> u64 {
        300
    }
    fn default_evidence_max_age() -> u64 {
        86_400
    }
    fn default_archive_threshold() -> f64 {
        0.05
    }
    fn default_decay_interval() -> u64 {
        3_600
    }

    /// Resolve into the inference engine's config, starting from its
    /// built-in label defaults.
    pub fn resolve(&self) -> InferenceConfig {
        let mut config = InferenceConfig::default();
        config.cooldown_enabled = self.cooldown;
        config.evidence_enabled = self.evidence;
        config.provenance_enabled = self.provenance;
        config.node_rules_enabled = self.node_rules;
        config.decay_enabled = self.decay;
        config.auto_cooldown = self.auto_cooldown;
        config.auto_evidence = self.auto_evidence;
        config.auto_provenance = self.auto_provenance;
        config.auto_node_rules = self.auto_node_rules;
        for (label, secs) in &self.cooldown_secs {
            config
                .cooldowns
                .insert(label.clone(), Duration::from_secs(*secs));
        }
        config.default_cooldown = Duration::from_secs(self.default_cooldown_secs);
        config.evidence_max_age = Duration::from_secs(self.evidence_max_age_secs);
        config.archive_threshold = self.archive_threshold;
        config
    }
}

impl Default for InferenceSection {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

/// `[vector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSection {
    /// Embedding dimension D.
    #[serde(default = "VectorSection::default_dimension")]
    pub dimension: usize,
    /// k-means K; 0 = automatic (`sqrt(N/2)` clamped to `[10, 1000]`).
    #[serde(default)]
    pub kmeans_k: usize,
    /// `"kmeans++"` or `"random"`.
    #[serde(default = "VectorSection::default_init")]
    pub init: String,
    /// Iteration cap per clustering pass.
    #[serde(default = "VectorSection::default_max_iterations")]
    pub max_iterations: usize,
    /// Convergence tolerance on centroid movement.
    #[serde(default = "VectorSection::default_tolerance")]
    pub tolerance: f32,
    /// Tier-2 drift that forces a recluster.
    #[serde(default = "VectorSection::default_drift")]
    pub drift_threshold: f32,
}

impl VectorSection {
    fn default_dimension() -> usize {
        384
    }
    fn default_init() -> String {
        "kmeans++".to_string()
    }
    fn default_max_iterations() -> usize {
        50
    }
    fn default_tolerance() -> f32 {
        1e-4
    }
    fn default_drift() -> f32 {
        0.1
    }

    /// Resolve into the k-means config.
    pub fn resolve(&self) -> Result<KMeansConfig> {
        let init = match self.init.as_str() {
            "kmeans++" => InitMethod::KMeansPlusPlus,
            "random" => InitMethod::Random,
            other => {
                return Err(NornicError::invalid_input(format!(
                    "invalid k-means init {:?}: expected \"kmeans++\" or \"random\"",
                    other
                )))
            }
        };
        Ok(KMeansConfig {
            k: (self.kmeans_k > 0).then_some(self.kmeans_k),
            init,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            drift_threshold: self.drift_threshold,
            ..KMeansConfig::default()
        })
    }
}

impl Default for VectorSection {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

/// `[temporal]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalSection {
    /// Bound on tracked nodes.
    #[serde(default = "TemporalSection::default_max_tracked")]
    pub max_tracked_nodes: usize,
    /// Minimum observations before predictions.
    #[serde(default = "TemporalSection::default_min_accesses")]
    pub min_accesses_for_prediction: u64,
    /// Session gap in seconds.
    #[serde(default = "TemporalSection::default_session_timeout")]
    pub session_timeout_secs: f64,
    /// Relative velocity swing that splits a session.
    #[serde(default = "TemporalSection::default_velocity_threshold")]
    pub velocity_change_threshold: f64,
    /// Kalman process noise.
    #[serde(default = "TemporalSection::default_process_noise")]
    pub process_noise: f64,
    /// Kalman measurement noise.
    #[serde(default = "TemporalSection::default_measurement_noise")]
    pub measurement_noise: f64,
}

impl TemporalSection {
    fn default_max_tracked() -> usize {
        10_000
    }
    fn default_min_accesses() -> u64 {
        3
    }
    fn default_session_timeout() -> f64 {
        300.0
    }
    fn default_velocity_threshold() -> f64 {
        0.5
    }
    fn default_process_noise() -> f64 {
        0.01
    }
    fn default_measurement_noise() -> f64 {
        0.1
    }

    /// Resolve into the tracker config.
    pub fn resolve(&self) -> TrackerConfig {
        TrackerConfig {
            max_tracked_nodes: self.max_tracked_nodes,
            min_accesses_for_prediction: self.min_accesses_for_prediction,
            session_timeout_secs: self.session_timeout_secs,
            velocity_change_threshold: self.velocity_change_threshold,
            process_noise: self.process_noise,
            measurement_noise: self.measurement_noise,
            ..TrackerConfig::default()
        }
    }
}

impl Default for TemporalSection {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Embedding cache capacity in entries; 0 disables caching.
    #[serde(default = "CacheSection::default_entries")]
    pub entries: usize,
}

impl CacheSection {
    fn default_entries() -> usize {
        10_000
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        CacheSection {
            entries: Self::default_entries(),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Whether authentication is enforced.
    #[serde(default)]
    pub enabled: bool,
    /// HMAC secret; must be at least 32 bytes when enabled.
    #[serde(default)]
    pub jwt_secret: String,
    /// Minimum password length.
    #[serde(default = "AuthSection::default_min_password")]
    pub min_password_length: usize,
    /// bcrypt cost.
    #[serde(default = "AuthSection::default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    /// Token expiry in seconds (0 = never).
    #[serde(default = "AuthSection::default_token_expiry")]
    pub token_expiry_secs: i64,
    /// Failed logins before lockout.
    #[serde(default = "AuthSection::default_max_failed")]
    pub max_failed_logins: u32,
    /// Lockout duration in seconds.
    #[serde(default = "AuthSection::default_lockout")]
    pub lockout_duration_secs: u64,
}

impl AuthSection {
    fn default_min_password() -> usize {
        8
    }
    fn default_bcrypt_cost() -> u32 {
        12
    }
    fn default_token_expiry() -> i64 {
        3_600
    }
    fn default_max_failed() -> u32 {
        3
    }
    fn default_lockout() -> u64 {
        900
    }

    /// Resolve into the authenticator config.
    pub fn resolve(&self) -> nornic_auth::AuthConfig {
        nornic_auth::AuthConfig {
            min_password_length: self.min_password_length,
            bcrypt_cost: self.bcrypt_cost,
            token_expiry_secs: self.token_expiry_secs,
            max_failed_logins: self.max_failed_logins,
            lockout_duration: Duration::from_secs(self.lockout_duration_secs),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        toml::from_str("").expect("defaults")
    }
}

/// The whole `nornicdb.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDbConfig {
    /// `[durability]`.
    #[serde(default)]
    pub durability: DurabilitySection,
    /// `[replication]`.
    #[serde(default)]
    pub replication: ReplicationSection,
    /// `[inference]`.
    #[serde(default)]
    pub inference: InferenceSection,
    /// `[vector]`.
    #[serde(default)]
    pub vector: VectorSection,
    /// `[temporal]`.
    #[serde(default)]
    pub temporal: TemporalSection,
    /// `[cache]`.
    #[serde(default)]
    pub cache: CacheSection,
    /// `[auth]`.
    #[serde(default)]
    pub auth: AuthSection,
}

impl GraphDbConfig {
    /// The default config file content, commented for operators.
    pub fn default_toml() -> &'static str {
        r#"# NornicDB configuration

[durability]
# Sync mode: "immediate" (fsync every append), "batch" (periodic fsync),
# or "none" (no fsync; un-flushed entries are lost on crash).
sync_mode = "batch"
flush_interval_ms = 100
# Async writes: mutations return "accepted" once buffered; a background
# flusher commits on the cadence below.
async_writes = false
write_behind_interval_ms = 50
snapshot_every_entries = 10000

[replication]
# "standalone", "hot_standby", "raft", or "multi_region".
mode = "standalone"
node_id = "node-1"
bind_addr = "127.0.0.1:7600"
# advertise_addr = "10.0.0.5:7600"
# [replication.peers]
# "node-2" = "10.0.0.6:7600"
election_timeout_min_ms = 150
election_timeout_max_ms = 300
heartbeat_interval_ms = 50
snapshot_threshold = 10000
# Hot standby: "async", "semi_sync", or "sync".
ack_mode = "semi_sync"
# Hot standby: "primary" ships WAL batches, "standby" applies them.
role = "primary"
# Unacked-entry backlog before writes fail with replica-lag errors
# (0 = unbounded).
max_lag_entries = 0
failover_timeout_ms = 5000
# Two nodes have no quorum. Automatic failover without an external
# arbiter risks split-brain; it stays off unless you opt in.
allow_unarbitrated_failover = false
# Multi-region: this node's region id and the cross-region conflict
# strategy ("last_write_wins" or "manual").
# region = "eu-west"
conflict_resolution = "last_write_wins"

[inference]
cooldown = true
evidence = true
provenance = true
node_rules = true
decay = true
auto_cooldown = true
auto_evidence = true
auto_provenance = true
auto_node_rules = true
default_cooldown_secs = 300
evidence_max_age_secs = 86400
archive_threshold = 0.05
decay_interval_secs = 3600
# Per-label cooldown overrides (seconds):
# [inference.cooldown_secs]
# relates_to = 300
# similar_to = 600

[vector]
dimension = 384
# 0 = automatic K (sqrt(N/2), clamped to [10, 1000]).
kmeans_k = 0
init = "kmeans++"
max_iterations = 50
tolerance = 0.0001
drift_threshold = 0.1

[temporal]
max_tracked_nodes = 10000
min_accesses_for_prediction = 3
session_timeout_secs = 300.0
velocity_change_threshold = 0.5
process_noise = 0.01
measurement_noise = 0.1

[cache]
# Embedding cache entries; 0 disables caching.
entries = 10000

[auth]
enabled = false
# Required (>= 32 bytes) when enabled = true.
# jwt_secret = "change-me-to-a-long-random-secret!!"
min_password_length = 8
bcrypt_cost = 12
token_expiry_secs = 3600
max_failed_logins = 3
lockout_duration_secs = 900
"#
    }

    /// Read and parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NornicError::invalid_input(format!(
                "failed to read config {:?}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| NornicError::invalid_input(format!("invalid nornicdb.toml: {}", e)))
    }

    /// Load the config from `dir`, writing the commented default file on
    /// first open.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            std::fs::create_dir_all(dir)?;
            std::fs::write(&path, Self::default_toml())?;
        }
        Self::from_file(&path)
    }
}
