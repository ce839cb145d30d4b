//! Adaptive weight profiles
//!
//! Short queries carry little semantic signal, so the lexical list gets
//! the weight; long queries are the opposite. The boundaries (≤ 2 tokens
//! keyword-heavy, ≥ 6 semantic-heavy) came out of retrieval-quality runs
//! against mixed workloads.

use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};

/// Per-list weights for fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    /// Weight of the dense vector list.
    pub vector: f64,
    /// Weight of the lexical list.
    pub lexical: f64,
}

impl WeightProfile {
    /// Keyword-heavy: vector 0.5, lexical 1.5.
    pub fn keyword_heavy() -> Self {
        WeightProfile {
            vector: 0.5,
            lexical: 1.5,
        }
    }

    /// Balanced: 1.0 each.
    pub fn balanced() -> Self {
        WeightProfile {
            vector: 1.0,
            lexical: 1.0,
        }
    }

    /// Semantic-heavy: vector 1.5, lexical 0.5.
    pub fn semantic_heavy() -> Self {
        WeightProfile {
            vector: 1.5,
            lexical: 0.5,
        }
    }

    /// Select a profile from the query's token count.
    pub fn for_query(query: &str) -> Self {
        match tokenize(query).len() {
            0..=2 => Self::keyword_heavy(),
            3..=5 => Self::balanced(),
            _ => Self::semantic_heavy(),
        }
    }
}

impl Default for WeightProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_query_keyword_heavy() {
        let p = WeightProfile::for_query("rust database");
        assert_eq!(p, WeightProfile::keyword_heavy());
        assert!(p.lexical > p.vector);
    }

    #[test]
    fn test_medium_query_balanced() {
        let p = WeightProfile::for_query("how to delete a node");
        assert_eq!(p, WeightProfile::balanced());
    }

    #[test]
    fn test_long_query_semantic_heavy() {
        let p = WeightProfile::for_query("what is the best way to model social graphs");
        assert_eq!(p, WeightProfile::semantic_heavy());
        assert!(p.vector > p.lexical);
    }

    #[test]
    fn test_empty_query_keyword_heavy() {
        assert_eq!(WeightProfile::for_query(""), WeightProfile::keyword_heavy());
    }
}
