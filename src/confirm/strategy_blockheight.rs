//! Block-height exceedance strategy
//!
//! Fails once the network has provably moved past a transaction's last valid
//! block height; otherwise stays pending until cancelled. Slot notifications
//! only estimate the block height (slots can be skipped), so an apparent
//! exceedance is verified against the actual block height before settling,
//! and the slot-to-height difference is recalibrated when the estimate was
//! wrong.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::cancellation::CancelToken;
use crate::commitment::Commitment;
use crate::transport::{RpcTransport, SubscriptionTransport, TransportError};

use super::errors::ConfirmError;
use super::rpc_calls::{get_epoch_info, notification_result, slot_subscribe_payload};

pub(crate) async fn wait_for_block_height_exceedance<T, S>(
    rpc: Arc<T>,
    subscriptions: Arc<S>,
    commitment: Commitment,
    last_valid_block_height: u64,
    token: CancelToken,
) -> Result<(), ConfirmError>
where
    T: RpcTransport,
    S: SubscriptionTransport,
{
    let strategy_token = token.child();
    let _cleanup = scopeguard::guard(strategy_token.clone(), |token| {
        token.cancel("block-height strategy finished");
    });

    let watch = async {
        let (channel, initial) = tokio::try_join!(
            subscriptions.open(slot_subscribe_payload(), &strategy_token),
            get_epoch_info(rpc.as_ref(), commitment, &strategy_token),
        )?;

        let mut current_block_height = initial.block_height;
        if current_block_height <= last_valid_block_height {
            let mut slot_height_difference =
                initial.absolute_slot.saturating_sub(initial.block_height);
            let mut notifications = channel.messages();
            loop {
                let Some(message) = notifications.next().await else {
                    return Err(ConfirmError::from(TransportError::ChannelClosed {
                        reason: "slot subscription ended".to_string(),
                    }));
                };
                let Some(result) = notification_result(&message, "slotNotification") else {
                    continue;
                };
                let Some(slot) = result.get("slot").and_then(Value::as_u64) else {
                    continue;
                };
                trace!(slot, last_valid_block_height, "observed slot notification");
                if slot.saturating_sub(slot_height_difference) > last_valid_block_height {
                    // The estimate says we are past the bound; verify against
                    // the actual block height before settling.
                    let rechecked = get_epoch_info(rpc.as_ref(), commitment, &strategy_token).await?;
                    current_block_height = rechecked.block_height;
                    if current_block_height > last_valid_block_height {
                        break;
                    }
                    // Blocks were skipped since the last reading; recalibrate
                    // and keep waiting.
                    slot_height_difference =
                        rechecked.absolute_slot.saturating_sub(rechecked.block_height);
                }
            }
        }
        debug!(
            current_block_height,
            last_valid_block_height, "block height exceeded"
        );
        Err(ConfirmError::BlockHeightExceeded {
            current_block_height,
            last_valid_block_height,
        })
    };

    tokio::select! {
        biased;
        reason = strategy_token.cancelled() => Err(ConfirmError::Cancelled {
            reason: reason.to_string(),
        }),
        outcome = watch => outcome,
    }
}
