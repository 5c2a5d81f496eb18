//! Confirmation engine
//!
//! Races multiple independent, cancellable evidence-gathering strategies to
//! decide, as early as possible, whether a submitted transaction committed,
//! was superseded, or can no longer commit. Every confirmation runs the
//! recent-signature strategy plus one lifetime-specific strategy chosen by
//! the transaction's lifetime constraint: block-height expiry, durable-nonce
//! invalidation, or a wall-clock timeout.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature};
use tokio::time::Instant;
use tracing::instrument;

use crate::cancellation::CancelToken;
use crate::commitment::Commitment;
use crate::config::ConfirmationSettings;
use crate::observability::CorrelationId;
use crate::transport::{RpcTransport, SubscriptionTransport};

// Submodules
pub mod errors;
mod racer;
mod rpc_calls;
mod strategy_blockheight;
mod strategy_nonce;
mod strategy_signature;
pub mod strategy_timeout;

// Re-exports for convenience
pub use errors::ConfirmError;
pub use strategy_timeout::default_confirmation_timeout;

/// How long a transaction stays eligible to commit; decides which strategy
/// races alongside the universal recent-signature strategy.
#[derive(Debug, Clone)]
pub enum LifetimeConstraint {
    /// Blockhash lifetime: the transaction expires past this block height.
    BlockHeight { last_valid_block_height: u64 },
    /// Durable nonce lifetime: the transaction dies when the nonce advances.
    DurableNonce {
        nonce_account: Pubkey,
        nonce_value: Hash,
    },
    /// No on-chain expiry signal; give up after a wall-clock timeout
    /// (commitment-dependent default when `None`).
    WallClock { timeout: Option<Duration> },
}

/// One confirmation to perform.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub signature: Signature,
    pub commitment: Commitment,
    pub lifetime: LifetimeConstraint,
    pub token: CancelToken,
}

/// Confirmation engine over a composed pair of transports.
pub struct TransactionConfirmer<T, S> {
    rpc: Arc<T>,
    subscriptions: Arc<S>,
    settings: ConfirmationSettings,
}

impl<T, S> TransactionConfirmer<T, S>
where
    T: RpcTransport,
    S: SubscriptionTransport,
{
    pub fn new(rpc: Arc<T>, subscriptions: Arc<S>) -> Self {
        Self::with_settings(rpc, subscriptions, ConfirmationSettings::default())
    }

    pub fn with_settings(
        rpc: Arc<T>,
        subscriptions: Arc<S>,
        settings: ConfirmationSettings,
    ) -> Self {
        Self {
            rpc,
            subscriptions,
            settings,
        }
    }

    /// Confirm a transaction, dispatching on its lifetime constraint.
    pub async fn confirm(&self, request: ConfirmationRequest) -> Result<(), ConfirmError> {
        match request.lifetime {
            LifetimeConstraint::BlockHeight {
                last_valid_block_height,
            } => {
                self.confirm_recent_transaction(
                    request.signature,
                    request.commitment,
                    last_valid_block_height,
                    &request.token,
                )
                .await
            }
            LifetimeConstraint::DurableNonce {
                nonce_account,
                nonce_value,
            } => {
                self.confirm_durable_nonce_transaction(
                    request.signature,
                    request.commitment,
                    nonce_account,
                    nonce_value,
                    &request.token,
                )
                .await
            }
            LifetimeConstraint::WallClock { timeout } => {
                self.confirm_transaction_until_timeout(
                    request.signature,
                    request.commitment,
                    timeout,
                    &request.token,
                )
                .await
            }
        }
    }

    /// Confirm a transaction with a blockhash lifetime: recent-signature
    /// raced against block-height exceedance.
    #[instrument(
        skip_all,
        fields(signature = %signature, commitment = %commitment, correlation_id = %CorrelationId::new())
    )]
    pub async fn confirm_recent_transaction(
        &self,
        signature: Signature,
        commitment: Commitment,
        last_valid_block_height: u64,
        token: &CancelToken,
    ) -> Result<(), ConfirmError> {
        racer::race_strategies(
            &signature,
            token,
            self.recent_signature_strategy(signature, commitment),
            {
                let rpc = Arc::clone(&self.rpc);
                let subscriptions = Arc::clone(&self.subscriptions);
                move |race_token| {
                    vec![strategy_blockheight::wait_for_block_height_exceedance(
                        rpc,
                        subscriptions,
                        commitment,
                        last_valid_block_height,
                        race_token,
                    )
                    .boxed()]
                }
            },
        )
        .await
    }

    /// Confirm a durable-nonce transaction: recent-signature raced against
    /// nonce invalidation.
    #[instrument(
        skip_all,
        fields(signature = %signature, commitment = %commitment, correlation_id = %CorrelationId::new())
    )]
    pub async fn confirm_durable_nonce_transaction(
        &self,
        signature: Signature,
        commitment: Commitment,
        nonce_account: Pubkey,
        nonce_value: Hash,
        token: &CancelToken,
    ) -> Result<(), ConfirmError> {
        racer::race_strategies(
            &signature,
            token,
            self.recent_signature_strategy(signature, commitment),
            {
                let rpc = Arc::clone(&self.rpc);
                let subscriptions = Arc::clone(&self.subscriptions);
                move |race_token| {
                    vec![strategy_nonce::wait_for_nonce_invalidation(
                        rpc,
                        subscriptions,
                        nonce_account,
                        nonce_value,
                        commitment,
                        race_token,
                    )
                    .boxed()]
                }
            },
        )
        .await
    }

    /// Confirm a transaction with no on-chain expiry signal: recent-signature
    /// raced against a wall-clock timeout. The clock starts here, so any
    /// subsequent waiting counts against the budget.
    #[instrument(
        skip_all,
        fields(signature = %signature, commitment = %commitment, correlation_id = %CorrelationId::new())
    )]
    pub async fn confirm_transaction_until_timeout(
        &self,
        signature: Signature,
        commitment: Commitment,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> Result<(), ConfirmError> {
        let started_at = Instant::now();
        let timeout = timeout.unwrap_or_else(|| self.settings.timeout_for(commitment));
        racer::race_strategies(
            &signature,
            token,
            self.recent_signature_strategy(signature, commitment),
            move |race_token| {
                vec![strategy_timeout::wait_for_timeout(timeout, started_at, race_token).boxed()]
            },
        )
        .await
    }

    fn recent_signature_strategy(
        &self,
        signature: Signature,
        commitment: Commitment,
    ) -> impl FnOnce(CancelToken) -> racer::StrategyFuture {
        let rpc = Arc::clone(&self.rpc);
        let subscriptions = Arc::clone(&self.subscriptions);
        move |race_token| {
            strategy_signature::confirm_recent_signature(
                rpc,
                subscriptions,
                signature,
                commitment,
                race_token,
            )
            .boxed()
        }
    }
}
