//! The edge-suggestion pipeline
//!
//! `process_suggestion` composes the gates in order: node rules →
//! cooldown → evidence → materialization. Gate outcomes are encoded in
//! the returned `Decision`, never as errors. Per the concurrency
//! discipline, each gate's datastore has its own lock and no cross-gate
//! lock is held: two racing suggestions for one triple may both pass the
//! cooldown check, but the second materialization lands as a touch of
//! the edge the first created, and the later cooldown mark wins.

use crate::config::InferenceConfig;
use crate::cooldown::{CooldownMark, CooldownTable};
use crate::evidence::{EvidenceBuffer, EvidenceEvent};
use crate::provenance::{ProvenanceLog, ProvenanceRecord};
use crate::rules::{NodeRule, NodeRuleStore, RuleVerdict};
use crate::state_log::StateLog;
use nornic_core::{
    now_millis, EdgeId, MemoryTier, NodeId, PropertyMap, Result, SessionId, SignalType,
};
use nornic_storage::GraphStore;
use nornic_temporal::decay_score;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// A proposed edge, typically produced by co-access detection, embedding
/// similarity, topology analysis, or an external model.
#[derive(Debug, Clone)]
pub struct EdgeSuggestion {
    /// Source node.
    pub src: NodeId,
    /// Target node.
    pub dst: NodeId,
    /// Edge label.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Signal classification.
    pub signal: SignalType,
    /// Originating session.
    pub session: SessionId,
}

/// The outcome of one suggestion. Blocked gates are data, not errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// An edge was written (or refreshed) through the storage engine.
    pub materialize: bool,
    /// The cooldown gate stopped processing.
    pub cooldown_blocked: bool,
    /// Evidence accumulated but thresholds are not yet met.
    pub evidence_pending: bool,
    /// A deny list or degree cap stopped processing.
    pub node_rule_blocked: bool,
    /// A provenance record was appended.
    pub provenance_logged: bool,
    /// The materialized edge, when `materialize` is true.
    pub edge_id: Option<EdgeId>,
}

/// Results of one decay sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecaySweepStats {
    /// Edges whose score was decayed.
    pub decayed: usize,
    /// Edges archived by this sweep.
    pub archived: usize,
    /// Edges skipped because a rule pins them.
    pub skipped_pinned: usize,
}

/// The inference engine.
pub struct InferenceEngine {
    store: Arc<GraphStore>,
    config: InferenceConfig,
    cooldowns: CooldownTable,
    evidence: EvidenceBuffer,
    rules: NodeRuleStore,
    provenance: ProvenanceLog,
    /// Per-node memory tiers driving time-based decay. Absent = Semantic.
    tiers: RwLock<HashMap<NodeId, MemoryTier>>,
    last_sweep: RwLock<Option<Instant>>,
    cooldown_log: Option<StateLog>,
    evidence_log: Option<StateLog>,
    rules_log: Option<StateLog>,
}

impl InferenceEngine {
    /// Engine with ephemeral stores. Tests construct a fresh one per
    /// case; nothing here is process-wide.
    pub fn in_memory(store: Arc<GraphStore>, config: InferenceConfig) -> Self {
        InferenceEngine {
            store,
            config,
            cooldowns: CooldownTable::new(),
            evidence: EvidenceBuffer::new(),
            rules: NodeRuleStore::new(),
            provenance: ProvenanceLog::in_memory(),
            tiers: RwLock::new(HashMap::new()),
            last_sweep: RwLock::new(None),
            cooldown_log: None,
            evidence_log: None,
            rules_log: None,
        }
    }

    /// Engine with durable stores under `root/state/`, reloading any
    /// persisted cooldowns, evidence, rules, and provenance.
    pub fn open<P: AsRef<Path>>(
        store: Arc<GraphStore>,
        config: InferenceConfig,
        root: P,
    ) -> Result<Self> {
        let root = root.as_ref();
        let cooldown_log = StateLog::open(root, "cooldowns")?;
        let evidence_log = StateLog::open(root, "evidence")?;
        let rules_log = StateLog::open(root, "node_rules")?;
        let provenance = ProvenanceLog::open(root)?;

        let cooldowns = CooldownTable::new();
        for mark in cooldown_log.read_all::<CooldownMark>()? {
            cooldowns.restore(&mark);
        }

        let evidence = EvidenceBuffer::new();
        for event in evidence_log.read_all::<EvidenceEvent>()? {
            match event {
                EvidenceEvent::Add {
                    src,
                    dst,
                    label,
                    score,
                    signal,
                    session,
                    ..
                } => {
                    evidence.add(src, dst, &label, score, signal, session);
                }
                EvidenceEvent::Clear { src, dst, label } => {
                    evidence.clear(src, dst, &label);
                }
            }
        }

        let rules = NodeRuleStore::new();
        for rule in rules_log.read_all::<NodeRule>()? {
            rules.set(rule);
        }

        info!(
            cooldowns = cooldowns.len(),
            evidence = evidence.len(),
            rules = rules.len(),
            provenance = provenance.len(),
            "inference state reloaded"
        );

        Ok(InferenceEngine {
            store,
            config,
            cooldowns,
            evidence,
            rules,
            provenance,
            tiers: RwLock::new(HashMap::new()),
            last_sweep: RwLock::new(None),
            cooldown_log: Some(cooldown_log),
            evidence_log: Some(evidence_log),
            rules_log: Some(rules_log),
        })
    }

    // =========================================================================
    // Direct store access (available regardless of auto-integration)
    // =========================================================================

    /// The cooldown table.
    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    /// The evidence buffer.
    pub fn evidence(&self) -> &EvidenceBuffer {
        &self.evidence
    }

    /// The per-node rule store.
    pub fn rules(&self) -> &NodeRuleStore {
        &self.rules
    }

    /// The provenance log.
    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    /// Active configuration.
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Install (and persist) rules for a node.
    pub fn set_rule(&self, rule: NodeRule) -> Result<()> {
        if let Some(log) = &self.rules_log {
            log.append(&rule)?;
        }
        self.rules.set(rule);
        Ok(())
    }

    /// Assign a node's memory tier (default Semantic).
    pub fn set_node_tier(&self, node: NodeId, tier: MemoryTier) {
        self.tiers.write().insert(node, tier);
    }

    fn tier_of(&self, node: NodeId) -> MemoryTier {
        self.tiers.read().get(&node).copied().unwrap_or_default()
    }

    // =========================================================================
    // The pipeline
    // =========================================================================

    /// Evaluate one suggestion through the gates.
    pub fn process_suggestion(&self, suggestion: EdgeSuggestion) -> Result<Decision> {
        let EdgeSuggestion {
            src,
            dst,
            label,
            confidence,
            signal,
            session,
        } = suggestion;
        let mut decision = Decision::default();

        // Gate 1: per-node rules. Pinned targets short-circuit gates 2–3.
        let mut pinned = false;
        if self.config.node_rules_enabled && self.config.auto_node_rules {
            let verdict = self.rules.evaluate(
                src,
                dst,
                self.store.degrees(src),
                self.store.degrees(dst),
            );
            match verdict {
                RuleVerdict::Denied | RuleVerdict::CapExceeded => {
                    debug!(%src, %dst, label, ?verdict, "suggestion blocked by node rule");
                    decision.node_rule_blocked = true;
                    return Ok(decision);
                }
                RuleVerdict::Pinned => pinned = true,
                RuleVerdict::Allowed => {}
            }
        }

        // Gate 2: cooldown (monotonic clock).
        if !pinned && self.config.cooldown_enabled && self.config.auto_cooldown {
            let cooldown = self.config.cooldown(&label);
            if self.cooldowns.is_blocked(src, dst, &label, cooldown) {
                debug!(%src, %dst, label, "suggestion blocked by cooldown");
                decision.cooldown_blocked = true;
                return Ok(decision);
            }
        }

        // Gate 3: evidence accumulation.
        let mut evidence_count = 0u64;
        if !pinned && self.config.evidence_enabled && self.config.auto_evidence {
            self.evidence.evict_expired(self.config.evidence_max_age);

            let (snapshot, event) =
                self.evidence
                    .add(src, dst, &label, confidence, signal.clone(), session.clone());
            if let Some(log) = &self.evidence_log {
                log.append(&event)?;
            }

            let scale = if self.config.node_rules_enabled {
                self.rules.trust_scale(src, dst)
            } else {
                1.0
            };
            let thresholds = self.config.thresholds(&label).scaled(scale);
            if !snapshot.meets(&thresholds) {
                decision.evidence_pending = true;
                return Ok(decision);
            }
            evidence_count = snapshot.count;

            self.evidence.clear(src, dst, &label);
            if let Some(log) = &self.evidence_log {
                log.append(&EvidenceEvent::Clear {
                    src,
                    dst,
                    label: label.clone(),
                })?;
            }
        }

        // Gate 4: materialization, write-through to storage.
        let decay_snapshot;
        let edge_id = match self.store.find_edge(src, dst, &label) {
            Some(edge) => {
                decay_snapshot = edge.score;
                self.store.touch_materialized(edge.id, confidence)?;
                edge.id
            }
            None => {
                decay_snapshot = 1.0;
                self.store.put_edge_scored(
                    src,
                    dst,
                    &label,
                    PropertyMap::new(),
                    confidence,
                    signal.clone(),
                )?
            }
        };

        let mark = self.cooldowns.mark(src, dst, &label);
        if let Some(log) = &self.cooldown_log {
            log.append(&mark)?;
        }

        decision.materialize = true;
        decision.edge_id = Some(edge_id);

        if self.config.provenance_enabled && self.config.auto_provenance {
            self.provenance.append(ProvenanceRecord {
                src,
                dst,
                label: label.clone(),
                score: confidence,
                signal,
                session,
                at_millis: now_millis(),
                evidence_count,
                decay_score: decay_snapshot,
            })?;
            decision.provenance_logged = true;
        }

        info!(%src, %dst, label, edge = %edge_id, "edge materialized");
        Ok(decision)
    }

    // =========================================================================
    // Decay sweep
    // =========================================================================

    /// Run one decay sweep: every live edge's score is multiplied by its
    /// label factor and by the tier decay for the time elapsed since the
    /// previous sweep; edges below the archive threshold are archived.
    /// Pinned edges never decay.
    pub fn decay_sweep(&self) -> Result<DecaySweepStats> {
        if !self.config.decay_enabled {
            return Ok(DecaySweepStats::default());
        }

        let elapsed_secs = {
            let mut last = self.last_sweep.write();
            let elapsed = last.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
            *last = Some(Instant::now());
            elapsed
        };

        let mut stats = DecaySweepStats::default();
        for edge_id in self.store.edge_ids() {
            let edge = match self.store.get_edge(edge_id) {
                Ok(edge) => edge,
                Err(_) => continue, // deleted mid-sweep
            };
            if self.config.node_rules_enabled && self.rules.is_pinned(edge.src, edge.dst) {
                stats.skipped_pinned += 1;
                continue;
            }

            // The faster-cooling endpoint tier governs the edge.
            let tier = {
                let src_tier = self.tier_of(edge.src);
                let dst_tier = self.tier_of(edge.dst);
                if src_tier.half_life_secs() <= dst_tier.half_life_secs() {
                    src_tier
                } else {
                    dst_tier
                }
            };
            let factor =
                self.config.decay_factor(&edge.label) * decay_score(tier, elapsed_secs);

            let new_score =
                self.store
                    .decay_edge(edge_id, factor, self.config.archive_threshold)?;
            stats.decayed += 1;
            if new_score < self.config.archive_threshold {
                stats.archived += 1;
            }
        }

        // The sweep shares its cadence with evidence aging.
        self.evidence.evict_expired(self.config.evidence_max_age);

        debug!(?stats, "decay sweep complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nornic_core::TrustLevel;

    fn setup() -> (Arc<GraphStore>, NodeId, NodeId) {
        let store = GraphStore::in_memory();
        let a = store.put_node(vec![], PropertyMap::new()).unwrap();
        let b = store.put_node(vec![], PropertyMap::new()).unwrap();
        (store, a, b)
    }

    fn suggestion(src: NodeId, dst: NodeId, session: &str, confidence: f64) -> EdgeSuggestion {
        EdgeSuggestion {
            src,
            dst,
            label: "relates_to".to_string(),
            confidence,
            signal: SignalType::Coaccess,
            session: session.to_string(),
        }
    }

    /// Config with the evidence gate relaxed to a single signal.
    fn instant_config() -> InferenceConfig {
        let mut config = InferenceConfig::default();
        config.default_thresholds = crate::config::EvidenceThresholds {
            min_count: 1,
            min_score: 0.0,
            min_sessions: 1,
        };
        config.thresholds.clear();
        config
    }

    #[test]
    fn test_cooldown_blocks_second_materialization() {
        let (store, a, b) = setup();
        let engine = InferenceEngine::in_memory(Arc::clone(&store), instant_config());

        let first = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
        assert!(first.materialize);
        assert!(first.provenance_logged);
        assert_eq!(engine.provenance().len(), 1);

        let second = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
        assert!(!second.materialize);
        assert!(second.cooldown_blocked);
        // No new edge and no new provenance.
        assert_eq!(engine.provenance().len(), 1);
        assert_eq!(store.stats().edge_count, 1);
    }

    #[test]
    fn test_evidence_accumulates_then_materializes() {
        let (store, a, b) = setup();
        // Contract thresholds: count 3, score 0.5, sessions 2.
        let engine = InferenceEngine::in_memory(Arc::clone(&store), InferenceConfig::default());

        let d1 = engine.process_suggestion(suggestion(a, b, "s1", 0.3)).unwrap();
        assert!(d1.evidence_pending && !d1.materialize);
        let d2 = engine.process_suggestion(suggestion(a, b, "s1", 0.3)).unwrap();
        assert!(d2.evidence_pending && !d2.materialize);
        let d3 = engine.process_suggestion(suggestion(a, b, "s2", 0.3)).unwrap();
        assert!(d3.materialize, "{:?}", d3);

        // Evidence cleared on materialization.
        assert!(engine.evidence().get(a, b, "relates_to").is_none());
        // Provenance carries the evidence count.
        let records = engine.provenance().for_triple(a, b, "relates_to");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].evidence_count, 3);
    }

    #[test]
    fn test_no_materialization_below_each_threshold() {
        let (store, a, b) = setup();
        let mut config = InferenceConfig::default();
        config.default_thresholds = crate::config::EvidenceThresholds {
            min_count: 2,
            min_score: 1.0,
            min_sessions: 1,
        };
        let engine = InferenceEngine::in_memory(store, config);

        // Two signals, two sessions, but score 0.8 < 1.0.
        engine.process_suggestion(suggestion(a, b, "s1", 0.4)).unwrap();
        let d = engine.process_suggestion(suggestion(a, b, "s2", 0.4)).unwrap();
        assert!(d.evidence_pending);
        // Third pushes the score over.
        let d = engine.process_suggestion(suggestion(a, b, "s1", 0.4)).unwrap();
        assert!(d.materialize);
    }

    #[test]
    fn test_deny_rule_blocks() {
        let (store, a, b) = setup();
        let engine = InferenceEngine::in_memory(store, instant_config());
        let mut rule = NodeRule::new(a);
        rule.denied.insert(b);
        engine.set_rule(rule).unwrap();

        let d = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
        assert!(d.node_rule_blocked);
        assert!(!d.materialize);
    }

    #[test]
    fn test_pinned_short_circuits_cooldown_and_evidence() {
        let (store, a, b) = setup();
        // Default thresholds would demand 3 signals; the pin skips them.
        let engine = InferenceEngine::in_memory(Arc::clone(&store), InferenceConfig::default());
        let mut rule = NodeRule::new(a);
        rule.pinned.insert(b);
        engine.set_rule(rule).unwrap();

        let d1 = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
        assert!(d1.materialize);
        // Pinned also bypasses the cooldown it just set.
        let d2 = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
        assert!(d2.materialize);
    }

    #[test]
    fn test_cap_blocks() {
        let store = GraphStore::in_memory();
        let a = store.put_node(vec![], PropertyMap::new()).unwrap();
        let b = store.put_node(vec![], PropertyMap::new()).unwrap();
        let c = store.put_node(vec![], PropertyMap::new()).unwrap();
        let engine = InferenceEngine::in_memory(Arc::clone(&store), instant_config());

        let mut rule = NodeRule::new(a);
        rule.max_out = Some(1);
        engine.set_rule(rule).unwrap();

        assert!(engine
            .process_suggestion(suggestion(a, b, "s1", 0.9))
            .unwrap()
            .materialize);
        let d = engine.process_suggestion(suggestion(a, c, "s1", 0.9)).unwrap();
        assert!(d.node_rule_blocked);
    }

    #[test]
    fn test_low_trust_raises_thresholds() {
        let (store, a, b) = setup();
        let mut config = InferenceConfig::default();
        config.default_thresholds = crate::config::EvidenceThresholds {
            min_count: 2,
            min_score: 0.2,
            min_sessions: 1,
        };
        let engine = InferenceEngine::in_memory(store, config);
        let mut rule = NodeRule::new(b);
        // Thresholds × 1.2: count 2 → 3, sessions 1 → 2.
        rule.trust = TrustLevel::Low;
        engine.set_rule(rule).unwrap();

        engine.process_suggestion(suggestion(a, b, "s1", 0.5)).unwrap();
        let d = engine.process_suggestion(suggestion(a, b, "s2", 0.5)).unwrap();
        assert!(d.evidence_pending, "{:?}", d);
        let d = engine.process_suggestion(suggestion(a, b, "s1", 0.5)).unwrap();
        assert!(d.materialize);
    }

    #[test]
    fn test_gates_disabled_pass_through() {
        let (store, a, b) = setup();
        let mut config = InferenceConfig::default();
        config.auto_cooldown = false;
        config.auto_evidence = false;
        config.auto_node_rules = false;
        let engine = InferenceEngine::in_memory(Arc::clone(&store), config);

        // Every suggestion materializes (as create, then touches).
        for _ in 0..3 {
            let d = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
            assert!(d.materialize);
        }
        assert_eq!(store.stats().edge_count, 1);
    }

    #[test]
    fn test_provenance_disabled() {
        let (store, a, b) = setup();
        let mut config = instant_config();
        config.provenance_enabled = false;
        let engine = InferenceEngine::in_memory(store, config);

        let d = engine.process_suggestion(suggestion(a, b, "s1", 0.9)).unwrap();
        assert!(d.materialize);
        assert!(!d.provenance_logged);
        assert!(engine.provenance().is_empty());
    }

    #[test]
    fn test_decay_sweep_archives_and_respects_pins() {
        let store = GraphStore::in_memory();
        let a = store.put_node(vec![], PropertyMap::new()).unwrap();
        let b = store.put_node(vec![], PropertyMap::new()).unwrap();
        let c = store.put_node(vec![], PropertyMap::new()).unwrap();

        let mut config = InferenceConfig::default();
        config.default_decay_factor = 0.5;
        config.decay_factors.clear();
        config.archive_threshold = 0.2;
        let engine = InferenceEngine::in_memory(Arc::clone(&store), config);

        store
            .put_edge_scored(a, b, "relates_to", PropertyMap::new(), 0.6, SignalType::Coaccess)
            .unwrap();
        store
            .put_edge_scored(a, c, "relates_to", PropertyMap::new(), 0.6, SignalType::Coaccess)
            .unwrap();
        let mut rule = NodeRule::new(a);
        rule.pinned.insert(c);
        engine.set_rule(rule).unwrap();

        // First sweep: 0.6 → 0.3 for the unpinned edge.
        let stats = engine.decay_sweep().unwrap();
        assert_eq!(stats.decayed, 1);
        assert_eq!(stats.skipped_pinned, 1);
        assert_eq!(stats.archived, 0);

        // Second sweep: 0.3 → 0.15 < 0.2, archived.
        let stats = engine.decay_sweep().unwrap();
        assert_eq!(stats.archived, 1);

        // The pinned edge never decayed.
        let pinned_edge = store.find_edge(a, c, "relates_to").unwrap();
        assert!((pinned_edge.score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_decay_disabled_is_noop() {
        let (store, a, b) = setup();
        let mut config = InferenceConfig::default();
        config.decay_enabled = false;
        let engine = InferenceEngine::in_memory(Arc::clone(&store), config);
        store.put_edge(a, b, "x", PropertyMap::new()).unwrap();
        let stats = engine.decay_sweep().unwrap();
        assert_eq!(stats, DecaySweepStats::default());
    }

    #[test]
    fn test_durable_state_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, a, b) = setup();

        {
            let engine =
                InferenceEngine::open(Arc::clone(&store), InferenceConfig::default(), dir.path())
                    .unwrap();
            // Two pending signals and a rule.
            engine.process_suggestion(suggestion(a, b, "s1", 0.3)).unwrap();
            engine.process_suggestion(suggestion(a, b, "s1", 0.3)).unwrap();
            let mut rule = NodeRule::new(a);
            rule.trust = TrustLevel::High;
            engine.set_rule(rule).unwrap();
        }

        let engine =
            InferenceEngine::open(Arc::clone(&store), InferenceConfig::default(), dir.path())
                .unwrap();
        // Evidence reloaded: the third signal from a second session tips it.
        let snapshot = engine.evidence().get(a, b, "relates_to").unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(engine.rules().get(a).unwrap().trust, TrustLevel::High);

        let d = engine.process_suggestion(suggestion(a, b, "s2", 0.3)).unwrap();
        assert!(d.materialize, "{:?}", d);

        // Reopen once more: the cooldown mark must survive.
        drop(engine);
        let engine =
            InferenceEngine::open(Arc::clone(&store), InferenceConfig::default(), dir.path())
                .unwrap();
        let d = engine.process_suggestion(suggestion(a, b, "s2", 0.9)).unwrap();
        assert!(d.cooldown_blocked, "{:?}", d);
    }
}
