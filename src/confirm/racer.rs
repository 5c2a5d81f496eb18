//! First-settled race over confirmation strategies
//!
//! The racer owns the cancellation fan-out: it derives one child token from
//! the caller's, hands it to every strategy, and cancels it on every exit
//! path so losing strategies unwind and release their subscriptions exactly
//! once.

use futures::future::{select_all, BoxFuture};
use solana_sdk::signature::Signature;
use tracing::{debug, warn};

use crate::cancellation::CancelToken;

use super::errors::ConfirmError;

pub(crate) type StrategyFuture = BoxFuture<'static, Result<(), ConfirmError>>;

/// Race the recent-signature strategy against zero or more lifetime-specific
/// strategies. The first to settle (success or failure) decides the outcome;
/// every other strategy is cancelled immediately after.
///
/// Fails with [`ConfirmError::Cancelled`] before starting any strategy if
/// the caller's token is already cancelled.
pub(crate) async fn race_strategies<R, F>(
    signature: &Signature,
    caller_token: &CancelToken,
    build_recent_signature_strategy: R,
    build_specific_strategies: F,
) -> Result<(), ConfirmError>
where
    R: FnOnce(CancelToken) -> StrategyFuture,
    F: FnOnce(CancelToken) -> Vec<StrategyFuture>,
{
    if let Some(reason) = caller_token.reason() {
        warn!(%signature, %reason, "confirmation requested with an already-cancelled token");
        return Err(ConfirmError::Cancelled {
            reason: reason.to_string(),
        });
    }

    let race_token = caller_token.child();
    let _cleanup = scopeguard::guard(race_token.clone(), |token| {
        token.cancel("confirmation race settled");
    });

    let mut strategies = vec![build_recent_signature_strategy(race_token.clone())];
    strategies.extend(build_specific_strategies(race_token.clone()));

    let (outcome, winner, _losers) = select_all(strategies).await;
    debug!(%signature, winner, settled_ok = outcome.is_ok(), "confirmation race settled");

    // If the caller cancelled, that is the authoritative cause regardless of
    // which strategy's unwinding error won the race.
    if outcome.is_err() {
        if let Some(reason) = caller_token.reason() {
            return Err(ConfirmError::Cancelled {
                reason: reason.to_string(),
            });
        }
    }
    outcome
}
