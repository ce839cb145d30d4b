//! Error types for NornicDB
//!
//! `NornicError` is the unified error type for all NornicDB APIs. We use
//! `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Inference-gate outcomes (cooldown blocked, evidence pending, node-rule
//! blocked) are *not* errors; they are encoded in the inference `Decision`.
//! The variants here are the failures that stop an operation.

use crate::types::{EdgeId, NodeId};
use std::io;
use thiserror::Error;

/// Result type alias for NornicDB operations.
pub type Result<T> = std::result::Result<T, NornicError>;

/// Unified error type for NornicDB operations.
#[derive(Debug, Error)]
pub enum NornicError {
    // =========================================================================
    // Storage / durability
    // =========================================================================
    /// WAL append or sync failed. Fatal for the affected mutation; the
    /// durability layer refuses further mutations until space is reclaimed.
    #[error("durability error: {message}")]
    Durability {
        /// What failed.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Data integrity check failed (bad CRC, truncated record).
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong.
        message: String,
    },

    /// Node not found.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The missing node.
        id: NodeId,
    },

    /// Edge not found.
    #[error("edge not found: {id}")]
    EdgeNotFound {
        /// The missing edge.
        id: EdgeId,
    },

    /// Input validation failed.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what's wrong with the input.
        message: String,
    },

    // =========================================================================
    // Vector index
    // =========================================================================
    /// Vector of the wrong dimension. Never retried.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Dimension provided by the caller.
        got: usize,
    },

    /// Cluster-accelerated path called before clustering ran. Internal:
    /// the index falls back to brute force instead of surfacing this.
    #[error("index not clustered")]
    NotClustered,

    // =========================================================================
    // Authentication
    // =========================================================================
    /// Bad password, unknown user, or disabled user. Deliberately one
    /// variant for all three to prevent user enumeration.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Account locked after too many failed logins.
    #[error("account locked")]
    AccountLocked,

    /// Token expired.
    #[error("session expired")]
    SessionExpired,

    /// Token malformed or signature invalid.
    #[error("invalid token")]
    InvalidToken,

    // =========================================================================
    // Cancellation / deadlines
    // =========================================================================
    /// Per-call deadline exceeded. Partial state is rolled back.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// What timed out.
        operation: String,
    },

    /// Operation canceled via its cancellation token.
    #[error("operation canceled: {operation}")]
    Canceled {
        /// What was canceled.
        operation: String,
    },

    // =========================================================================
    // Replication
    // =========================================================================
    /// Replica fell too far behind the primary.
    #[error("replica lag exceeded: {lag_entries} entries")]
    ReplicaLagExceeded {
        /// How many entries behind.
        lag_entries: u64,
    },

    /// Raft quorum lost; writes unavailable until a majority returns.
    #[error("quorum lost: {reachable} of {voters} voters reachable")]
    QuorumLost {
        /// Reachable voter count.
        reachable: usize,
        /// Total voter count.
        voters: usize,
    },

    // =========================================================================
    // I/O
    // =========================================================================
    /// Underlying I/O failure outside the WAL append path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NornicError {
    /// Create a Durability error.
    pub fn durability(message: impl Into<String>) -> Self {
        NornicError::Durability {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Durability error with an underlying cause.
    pub fn durability_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        NornicError::Durability {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        NornicError::Corruption {
            message: message.into(),
        }
    }

    /// Create a Serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        NornicError::Serialization {
            message: message.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        NornicError::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a Timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        NornicError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a Canceled error.
    pub fn canceled(operation: impl Into<String>) -> Self {
        NornicError::Canceled {
            operation: operation.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Authentication-class errors. These are logged as audit events and
    /// surfaced to the caller with uniform messages.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            NornicError::InvalidCredentials
                | NornicError::AccountLocked
                | NornicError::SessionExpired
                | NornicError::InvalidToken
        )
    }

    /// Errors that may succeed on an independent retry (a transient
    /// embedder failure, a caller-driven timeout, replication catching
    /// up, a majority returning).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NornicError::Timeout { .. }
                | NornicError::ReplicaLagExceeded { .. }
                | NornicError::QuorumLost { .. }
        )
    }

    /// Serious errors indicating potential data loss or a bug; these are
    /// logged and should stop the affected subsystem.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            NornicError::Corruption { .. } | NornicError::Durability { .. }
        )
    }

    /// Not-found class errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NornicError::NodeNotFound { .. } | NornicError::EdgeNotFound { .. }
        )
    }
}

impl From<bincode::Error> for NornicError {
    fn from(e: bincode::Error) -> Self {
        NornicError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for NornicError {
    fn from(e: serde_json::Error) -> Self {
        NornicError::Serialization {
            message: format!("JSON error: {}", e),
        }
    }
}
