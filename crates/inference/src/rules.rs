//! Per-node rules
//!
//! Pin lists (targets never decayed, and fast-tracked past cooldown and
//! evidence), deny lists (targets never created), per-direction degree
//! caps, and a trust level that scales the evidence thresholds.

use nornic_core::{NodeId, TrustLevel};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Rules for one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRule {
    /// The node these rules apply to.
    pub node: NodeId,
    /// Targets whose edges are never decayed and skip the cooldown and
    /// evidence gates.
    #[serde(default)]
    pub pinned: BTreeSet<NodeId>,
    /// Targets toward which edges are never created by inference.
    #[serde(default)]
    pub denied: BTreeSet<NodeId>,
    /// Cap on inbound inferred edges.
    #[serde(default)]
    pub max_in: Option<usize>,
    /// Cap on outbound inferred edges.
    #[serde(default)]
    pub max_out: Option<usize>,
    /// Cap on total incident inferred edges.
    #[serde(default)]
    pub max_total: Option<usize>,
    /// Trust level scaling the evidence thresholds.
    #[serde(default)]
    pub trust: TrustLevel,
}

impl NodeRule {
    /// Empty rule set for a node.
    pub fn new(node: NodeId) -> Self {
        NodeRule {
            node,
            ..NodeRule::default()
        }
    }
}

/// Why the rule gate blocked a suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleVerdict {
    /// No rule objects; proceed through the remaining gates.
    Allowed,
    /// Either endpoint pins the other: materialize without cooldown or
    /// evidence checks.
    Pinned,
    /// A deny list forbids the edge.
    Denied,
    /// A degree cap would be exceeded.
    CapExceeded,
}

/// The per-node rule store.
pub struct NodeRuleStore {
    rules: RwLock<HashMap<NodeId, NodeRule>>,
}

impl Default for NodeRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRuleStore {
    /// Empty store.
    pub fn new() -> Self {
        NodeRuleStore {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Install (replacing) the rules for a node.
    pub fn set(&self, rule: NodeRule) {
        self.rules.write().insert(rule.node, rule);
    }

    /// Rules for a node, if any.
    pub fn get(&self, node: NodeId) -> Option<NodeRule> {
        self.rules.read().get(&node).cloned()
    }

    /// Remove a node's rules.
    pub fn remove(&self, node: NodeId) -> bool {
        self.rules.write().remove(&node).is_some()
    }

    /// Number of nodes with rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Whether no rules are installed.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Evaluate the rule gate for a suggested edge.
    ///
    /// `src_degrees` / `dst_degrees` are (in, out) live-edge counts from
    /// the storage engine, used against the caps.
    pub fn evaluate(
        &self,
        src: NodeId,
        dst: NodeId,
        src_degrees: (usize, usize),
        dst_degrees: (usize, usize),
    ) -> RuleVerdict {
        let rules = self.rules.read();
        let src_rule = rules.get(&src);
        let dst_rule = rules.get(&dst);

        // Deny wins over everything, including pins.
        if src_rule.map_or(false, |r| r.denied.contains(&dst))
            || dst_rule.map_or(false, |r| r.denied.contains(&src))
        {
            return RuleVerdict::Denied;
        }

        // Caps: the new edge is src-outbound and dst-inbound.
        if let Some(rule) = src_rule {
            let (in_deg, out_deg) = src_degrees;
            if rule.max_out.map_or(false, |cap| out_deg >= cap)
                || rule.max_total.map_or(false, |cap| in_deg + out_deg >= cap)
            {
                return RuleVerdict::CapExceeded;
            }
        }
        if let Some(rule) = dst_rule {
            let (in_deg, out_deg) = dst_degrees;
            if rule.max_in.map_or(false, |cap| in_deg >= cap)
                || rule.max_total.map_or(false, |cap| in_deg + out_deg >= cap)
            {
                return RuleVerdict::CapExceeded;
            }
        }

        if src_rule.map_or(false, |r| r.pinned.contains(&dst))
            || dst_rule.map_or(false, |r| r.pinned.contains(&src))
        {
            return RuleVerdict::Pinned;
        }

        RuleVerdict::Allowed
    }

    /// The trust scale applied to evidence thresholds for an edge: the
    /// stricter (larger) of the endpoints' multipliers, so a low-trust
    /// endpoint cannot be bypassed via a high-trust partner.
    pub fn trust_scale(&self, src: NodeId, dst: NodeId) -> f64 {
        let rules = self.rules.read();
        let scale = |node: NodeId| {
            rules
                .get(&node)
                .map(|r| r.trust.threshold_scale())
                .unwrap_or(1.0)
        };
        scale(src).max(scale(dst))
    }

    /// Whether the (src, dst) pair is pinned in either direction. Pinned
    /// edges are exempt from decay.
    pub fn is_pinned(&self, src: NodeId, dst: NodeId) -> bool {
        let rules = self.rules.read();
        rules.get(&src).map_or(false, |r| r.pinned.contains(&dst))
            || rules.get(&dst).map_or(false, |r| r.pinned.contains(&src))
    }
}
