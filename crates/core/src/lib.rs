//! Core types and traits for NornicDB
//!
//! This crate defines the foundational types used throughout the system:
//! - NodeId / EdgeId: Unique identifiers for graph entities
//! - Value: Unified scalar/array value enum for node and edge properties
//! - Node / Edge: The graph records owned by the storage engine
//! - SignalType: Provenance tag for inferred relationships
//! - MemoryTier: Longevity classification controlling decay half-life
//! - NornicError: Unified error type for all NornicDB APIs
//! - CancelToken: Cooperative cancellation observed at suspension points

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod graph;
pub mod types;
pub mod value;

pub use cancel::CancelToken;
pub use error::{NornicError, Result};
pub use graph::{Edge, Node};
pub use types::{
    now_millis, Direction, EdgeId, MemoryTier, NodeId, SessionId, SignalType, TimestampMillis,
    TrustLevel,
};
pub use value::{PropertyMap, Value};
