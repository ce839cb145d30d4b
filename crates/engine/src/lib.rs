//! The NornicDB engine
//!
//! [`GraphDb`] is the coordinator: it loads (or bootstraps) the config
//! file, recovers durable state, wires the storage engine to the WAL,
//! and owns the vector index, temporal tracker, inference engine, and
//! optional authenticator. The Cypher front-end and the wire servers sit
//! above this crate and consume its resolved API.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod db;
pub mod replication;

pub use config::{GraphDbConfig, CONFIG_FILE_NAME};
pub use db::GraphDb;
pub use replication::ReplicationRuntime;
