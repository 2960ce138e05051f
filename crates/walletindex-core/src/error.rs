//! Error types for the wallet history and sync pipeline.

use thiserror::Error;

/// Errors that can occur while querying or synchronizing a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// Caller input was rejected before any substrate call was made.
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("No connection to daemon")]
    NotConnected,

    #[error("Daemon is not synced (height {height}, target {target})")]
    DaemonNotSynced { height: u64, target: u64 },

    #[error("Substrate call timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Substrate error: {0}")]
    Substrate(String),

    #[error("Tx not found in wallet: {0}")]
    TxNotFound(String),

    /// Two substrate calls observed different states of the same tx.
    #[error("Inconsistent state for tx {tx_id}: {reason}")]
    Inconsistent { tx_id: String, reason: String },

    #[error("Cannot reconcile {field} of tx {tx_id}")]
    MergeConflict { tx_id: String, field: String },

    #[error("Tx id is not initialized")]
    MissingTxId,

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Wallet is closed")]
    Closed,
}

impl WalletError {
    /// Shorthand for an [`WalletError::InvalidInput`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for programming errors that are never user-recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingTxId | Self::Invariant(_))
    }

    /// Returns `true` if the error stems from non-atomic substrate reads.
    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Inconsistent { .. })
    }

    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::DaemonNotSynced { .. }
                | Self::Timeout { .. }
                | Self::Substrate(_)
                | Self::Inconsistent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(WalletError::MissingTxId.is_fatal());
        assert!(!WalletError::MissingTxId.is_retryable());

        let e = WalletError::Inconsistent {
            tx_id: "aa11".into(),
            reason: "confirmed without block".into(),
        };
        assert!(e.is_consistency());
        assert!(e.is_retryable());
        assert!(!e.is_fatal());

        assert!(!WalletError::invalid("tx id", "bad hex").is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        let e = WalletError::TxNotFound("beef".into());
        assert_eq!(e.to_string(), "Tx not found in wallet: beef");

        let e = WalletError::MergeConflict {
            tx_id: "aa11".into(),
            field: "fee".into(),
        };
        assert!(e.to_string().contains("fee"));
        assert!(e.to_string().contains("aa11"));
    }
}
