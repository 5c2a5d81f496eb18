//! Recent-signature strategy
//!
//! Determines whether a signature has reached the requested commitment by
//! racing a push subscription against one one-shot status lookup. Either
//! path is authoritative; the first to observe sufficient commitment wins.
//! The one-shot branch parks forever on a non-conclusive result rather than
//! polling again; from there the subscription owns the outcome.

use std::sync::Arc;

use futures::future;
use solana_sdk::signature::Signature;
use tracing::debug;

use crate::cancellation::CancelToken;
use crate::commitment::Commitment;
use crate::transport::{RpcTransport, SubscriptionTransport, TransportError};

use super::errors::ConfirmError;
use super::rpc_calls::{get_signature_status, notification_result, signature_subscribe_payload};

pub(crate) async fn confirm_recent_signature<T, S>(
    rpc: Arc<T>,
    subscriptions: Arc<S>,
    signature: Signature,
    commitment: Commitment,
    token: CancelToken,
) -> Result<(), ConfirmError>
where
    T: RpcTransport,
    S: SubscriptionTransport,
{
    let strategy_token = token.child();
    let _cleanup = scopeguard::guard(strategy_token.clone(), |token| {
        token.cancel("recent-signature strategy finished");
    });

    let channel = subscriptions
        .open(
            signature_subscribe_payload(&signature, commitment),
            &strategy_token,
        )
        .await?;
    let mut notifications = channel.messages();

    let push = async {
        loop {
            let Some(message) = notifications.next().await else {
                return Err(ConfirmError::from(TransportError::ChannelClosed {
                    reason: "signature subscription ended".to_string(),
                }));
            };
            let Some(result) = notification_result(&message, "signatureNotification") else {
                continue;
            };
            let err = result
                .get("value")
                .and_then(|value| value.get("err"))
                .filter(|err| !err.is_null());
            match err {
                Some(cause) => {
                    return Err(ConfirmError::TransactionFailed {
                        signature,
                        cause: cause.clone(),
                    });
                }
                None => {
                    debug!(%signature, %commitment, "signature confirmed via subscription");
                    return Ok(());
                }
            }
        }
    };

    let lookup = async {
        if let Some(status) = get_signature_status(rpc.as_ref(), &signature, &strategy_token).await?
        {
            if let Some(cause) = status.err {
                return Err(ConfirmError::TransactionFailed { signature, cause });
            }
            if status
                .confirmation_status
                .is_some_and(|observed| commitment.satisfied_by(observed))
            {
                debug!(%signature, %commitment, "signature already at sufficient commitment");
                return Ok(());
            }
        }
        // Not conclusive; park and let the subscription decide.
        future::pending::<Result<(), ConfirmError>>().await
    };

    tokio::select! {
        biased;
        reason = strategy_token.cancelled() => Err(ConfirmError::Cancelled {
            reason: reason.to_string(),
        }),
        outcome = push => outcome,
        outcome = lookup => outcome,
    }
}
