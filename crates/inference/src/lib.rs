//! Real-time edge inference for NornicDB
//!
//! The engine accepts edge suggestions and decides whether to materialize
//! them as real edges, composing four gates in order:
//!
//! 1. Per-node rules (deny lists, degree caps; pins short-circuit 2 & 3)
//! 2. Cooldown (minimum interval per (src, dst, label) triple)
//! 3. Evidence (count / score / distinct-session thresholds per label,
//!    scaled by trust level)
//! 4. Materialization (write-through to storage, provenance append)
//!
//! Each gate is independently feature-flagged, and "auto-integration"
//! flags control whether `process_suggestion` consults a gate at all —
//! the underlying stores stay directly accessible either way.
//!
//! Cooldowns and election-style timing use monotonic clocks; wall-clock
//! timestamps appear only in records and persisted state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cooldown;
pub mod engine;
pub mod evidence;
pub mod provenance;
pub mod rules;
pub mod state_log;

pub use config::{EvidenceThresholds, InferenceConfig};
pub use cooldown::CooldownTable;
pub use engine::{Decision, DecaySweepStats, EdgeSuggestion, InferenceEngine};
pub use evidence::{EvidenceBuffer, EvidenceSignal};
pub use provenance::{ProvenanceLog, ProvenanceRecord};
pub use rules::{NodeRule, NodeRuleStore};
pub use state_log::StateLog;
