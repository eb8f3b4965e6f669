//! Cooperative cancellation for driven operations.
//!
//! Drivers poll the token at node boundaries only. A fired token unwinds the
//! walk with [`WcError::Cancelled`]; lock handles already open stay open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::WcError;

/// A token that can be used to check if an operation has been cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel the operation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if the operation has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`WcError::Cancelled`] once the token has fired.
    pub fn check(&self) -> Result<(), WcError> {
        if self.is_cancelled() {
            Err(WcError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_token_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(WcError::Cancelled)));
    }
}
