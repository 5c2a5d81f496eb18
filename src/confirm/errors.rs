use serde_json::Value;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature};
use thiserror::Error;

use crate::transport::TransportError;

/// Confirmation engine error types. Callers branch on kind, never on message
/// text: cancellation, evidence of non-confirmation, and giving up waiting
/// are distinguishable outcomes.
#[derive(Debug, Clone, Error)]
pub enum ConfirmError {
    /// The caller's token (or a parent of it) was cancelled
    #[error("confirmation cancelled: {reason}")]
    Cancelled { reason: String },

    /// The transaction landed but failed on chain
    #[error("transaction {signature} failed on chain: {cause}")]
    TransactionFailed { signature: Signature, cause: Value },

    /// The network moved past the transaction's last valid block height
    #[error("block height exceeded: current {current_block_height}, last valid {last_valid_block_height}")]
    BlockHeightExceeded {
        current_block_height: u64,
        last_valid_block_height: u64,
    },

    /// The durable nonce advanced, so the transaction can no longer commit
    #[error("nonce advanced: expected {expected}, found {actual}")]
    NonceInvalid { expected: Hash, actual: Hash },

    /// The nonce account does not exist at the queried commitment
    #[error("nonce account not found: {nonce_account}")]
    NonceAccountNotFound { nonce_account: Pubkey },

    /// We gave up waiting
    #[error("confirmation timed out after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64 },

    /// Transport-level failure underneath a strategy
    #[error(transparent)]
    Transport(TransportError),
}

impl ConfirmError {
    /// Caller-initiated or propagated cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConfirmError::Cancelled { .. })
    }

    /// The race produced proof the transaction did not or cannot confirm.
    pub fn is_evidence_of_non_confirmation(&self) -> bool {
        matches!(
            self,
            ConfirmError::TransactionFailed { .. }
                | ConfirmError::BlockHeightExceeded { .. }
                | ConfirmError::NonceInvalid { .. }
                | ConfirmError::NonceAccountNotFound { .. }
        )
    }

    /// We stopped waiting without evidence either way.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConfirmError::TimedOut { .. })
    }
}

impl From<TransportError> for ConfirmError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled { reason } => ConfirmError::Cancelled { reason },
            other => ConfirmError::Transport(other),
        }
    }
}
