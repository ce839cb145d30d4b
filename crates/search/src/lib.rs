//! Hybrid retrieval for NornicDB
//!
//! Fuses two ranked result lists — dense vector search and an external
//! lexical (BM25-style) matcher — with Reciprocal Rank Fusion. Query
//! length drives the weight profile: short queries lean lexical, long
//! queries lean semantic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fuser;
pub mod tokenizer;
pub mod weights;

pub use fuser::{rrf_fuse, FusedHit, RankedList, RrfConfig, DEFAULT_RRF_K};
pub use tokenizer::tokenize;
pub use weights::WeightProfile;
