//! Cooperative cancellation
//!
//! Client-visible operations accept a `CancelToken` and observe it at each
//! suspension point (embedder calls, WAL sync, snapshot writes, network
//! sends). On cancel, partial state is rolled back by the caller.
//!
//! Tokens are cheap to clone; all clones share one flag.

use crate::error::{NornicError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, un-canceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that can never be canceled; used by internal callers that
    /// have no client to answer to (recovery, background flushers).
    pub fn never() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Suspension-point check: returns `Canceled` if cancellation was
    /// requested, naming the operation for the error message.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_canceled() {
            Err(NornicError::canceled(operation))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_canceled() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        assert!(token.check("op").is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_canceled());
        let err = clone.check("wal sync").unwrap_err();
        assert!(err.to_string().contains("wal sync"));
    }

    #[test]
    fn test_cancel_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_canceled());
    }
}
