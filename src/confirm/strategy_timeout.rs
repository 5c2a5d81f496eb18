//! Wall-clock timeout strategy
//!
//! Fails after a fixed or commitment-dependent duration. The deadline is
//! measured from a caller-supplied start instant, not from strategy start,
//! so delay the caller already incurred before racing counts against the
//! budget.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cancellation::CancelToken;
use crate::commitment::Commitment;

use super::errors::ConfirmError;

pub const PROCESSED_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Timeout applied when the caller does not supply one: processed → 30s,
/// confirmed/finalized → 60s.
pub fn default_confirmation_timeout(commitment: Commitment) -> Duration {
    match commitment {
        Commitment::Processed => PROCESSED_TIMEOUT,
        Commitment::Confirmed | Commitment::Finalized => DEFAULT_TIMEOUT,
    }
}

pub(crate) async fn wait_for_timeout(
    timeout: Duration,
    started_at: Instant,
    token: CancelToken,
) -> Result<(), ConfirmError> {
    let deadline = started_at + timeout;
    tokio::select! {
        biased;
        reason = token.cancelled() => Err(ConfirmError::Cancelled {
            reason: reason.to_string(),
        }),
        _ = tokio::time::sleep_until(deadline) => {
            let elapsed_ms = started_at.elapsed().as_millis() as u64;
            debug!(elapsed_ms, "confirmation timed out");
            Err(ConfirmError::TimedOut { elapsed_ms })
        }
    }
}
