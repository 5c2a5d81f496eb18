//! Nonce invalidation strategy
//!
//! Durable-nonce transactions have no block-height expiry; they die when the
//! nonce account's stored value advances. This strategy races a push
//! subscription on the nonce account against a one-shot fetch that catches a
//! nonce which already advanced before we subscribed. The one-shot branch
//! parks forever when the nonce still matches.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future;
use serde_json::Value;
use solana_sdk::{hash::Hash, pubkey::Pubkey};
use tracing::{debug, warn};

use crate::cancellation::CancelToken;
use crate::commitment::Commitment;
use crate::transport::{RpcTransport, SubscriptionTransport, TransportError};

use super::errors::ConfirmError;
use super::rpc_calls::{account_subscribe_payload, get_nonce_value, notification_result};

/// Nonce account layout: version (u32), state (u32), authority (pubkey),
/// then the nonce value itself.
pub(crate) const NONCE_VALUE_OFFSET: usize = 4 + 4 + 32;
pub(crate) const NONCE_VALUE_LENGTH: usize = 32;

pub(crate) async fn wait_for_nonce_invalidation<T, S>(
    rpc: Arc<T>,
    subscriptions: Arc<S>,
    nonce_account: Pubkey,
    expected_nonce_value: Hash,
    commitment: Commitment,
    token: CancelToken,
) -> Result<(), ConfirmError>
where
    T: RpcTransport,
    S: SubscriptionTransport,
{
    let strategy_token = token.child();
    let _cleanup = scopeguard::guard(strategy_token.clone(), |token| {
        token.cancel("nonce-invalidation strategy finished");
    });

    let channel = subscriptions
        .open(
            account_subscribe_payload(&nonce_account, commitment),
            &strategy_token,
        )
        .await?;
    let mut notifications = channel.messages();

    let push = async {
        loop {
            let Some(message) = notifications.next().await else {
                return Err(ConfirmError::from(TransportError::ChannelClosed {
                    reason: "nonce account subscription ended".to_string(),
                }));
            };
            let Some(result) = notification_result(&message, "accountNotification") else {
                continue;
            };
            let Some(actual) = nonce_value_from_notification(result) else {
                warn!(%nonce_account, "ignoring account notification without a decodable nonce");
                continue;
            };
            if actual != expected_nonce_value {
                debug!(%nonce_account, %actual, "nonce advanced via subscription");
                return Err(ConfirmError::NonceInvalid {
                    expected: expected_nonce_value,
                    actual,
                });
            }
        }
    };

    let lookup = async {
        match get_nonce_value(rpc.as_ref(), &nonce_account, commitment, &strategy_token).await? {
            None => Err(ConfirmError::NonceAccountNotFound { nonce_account }),
            Some(actual) if actual != expected_nonce_value => {
                debug!(%nonce_account, %actual, "nonce already advanced before subscribing");
                Err(ConfirmError::NonceInvalid {
                    expected: expected_nonce_value,
                    actual,
                })
            }
            // The nonce still matches; park and let the subscription decide.
            Some(_) => future::pending::<Result<(), ConfirmError>>().await,
        }
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

/// Decode the nonce value from a base64 account notification payload.
fn nonce_value_from_notification(result: &Value) -> Option<Hash> {
    let encoded = result
        .get("value")?
        .get("data")?
        .get(0)?
        .as_str()?;
    let data = BASE64.decode(encoded).ok()?;
    let bytes: [u8; NONCE_VALUE_LENGTH] = data
        .get(NONCE_VALUE_OFFSET..NONCE_VALUE_OFFSET + NONCE_VALUE_LENGTH)?
        .try_into()
        .ok()?;
    Some(Hash::new_from_array(bytes))
}
