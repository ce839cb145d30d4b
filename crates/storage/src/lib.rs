//! Graph storage engine for NornicDB
//!
//! Keyed node/edge records with adjacency and label indexes, held in
//! memory behind one reader-writer lock. Every mutation is recorded in
//! the WAL before it is applied, so WAL-sequence order equals apply order
//! within a node (the ordered-durability invariant).
//!
//! The graph is cyclic; records reference each other by id only. Deleting
//! a node walks the id-keyed adjacency index to cascade incident edges —
//! nothing chases direct pointers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod scan;

pub use graph::{GraphStats, GraphStore};
pub use scan::LabelScan;
