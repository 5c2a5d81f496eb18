//! Thin typed wrappers over the JSON-RPC calls and subscription payloads the
//! confirmation strategies need. The full typed method surface lives outside
//! this crate; these helpers only parse the handful of fields the strategies
//! act on.

use serde_json::{json, Value};
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature};

use crate::cancellation::CancelToken;
use crate::commitment::Commitment;
use crate::transport::{subscription_payload, RpcRequest, RpcTransport, TransportError};

use super::strategy_nonce::{NONCE_VALUE_LENGTH, NONCE_VALUE_OFFSET};

#[derive(Debug, Clone)]
pub(crate) struct SignatureStatus {
    pub err: Option<Value>,
    pub confirmation_status: Option<Commitment>,
}

pub(crate) async fn get_signature_status<T: RpcTransport>(
    rpc: &T,
    signature: &Signature,
    token: &CancelToken,
) -> Result<Option<SignatureStatus>, TransportError> {
    let request = RpcRequest::new(
        "getSignatureStatuses",
        json!([[signature.to_string()], {"searchTransactionHistory": false}]),
    );
    let result = rpc.send(request, token).await?;
    let statuses = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::invalid_response("getSignatureStatuses missing value"))?;
    let Some(entry) = statuses.first() else {
        return Ok(None);
    };
    if entry.is_null() {
        return Ok(None);
    }
    let err = entry.get("err").filter(|e| !e.is_null()).cloned();
    let confirmation_status = entry
        .get("confirmationStatus")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());
    Ok(Some(SignatureStatus {
        err,
        confirmation_status,
    }))
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EpochInfo {
    pub absolute_slot: u64,
    pub block_height: u64,
}

pub(crate) async fn get_epoch_info<T: RpcTransport>(
    rpc: &T,
    commitment: Commitment,
    token: &CancelToken,
) -> Result<EpochInfo, TransportError> {
    let request = RpcRequest::new("getEpochInfo", json!([{"commitment": commitment.as_str()}]));
    let result = rpc.send(request, token).await?;
    let absolute_slot = result
        .get("absoluteSlot")
        .and_then(Value::as_u64)
        .ok_or_else(|| TransportError::invalid_response("getEpochInfo missing absoluteSlot"))?;
    let block_height = result
        .get("blockHeight")
        .and_then(Value::as_u64)
        .ok_or_else(|| TransportError::invalid_response("getEpochInfo missing blockHeight"))?;
    Ok(EpochInfo {
        absolute_slot,
        block_height,
    })
}

/// One-shot fetch of just the nonce value bytes, base58-encoded by the
/// server. `None` means the account does not exist at this commitment.
pub(crate) async fn get_nonce_value<T: RpcTransport>(
    rpc: &T,
    nonce_account: &Pubkey,
    commitment: Commitment,
    token: &CancelToken,
) -> Result<Option<Hash>, TransportError> {
    let request = RpcRequest::new(
        "getAccountInfo",
        json!([
            nonce_account.to_string(),
            {
                "commitment": commitment.as_str(),
                "dataSlice": {"offset": NONCE_VALUE_OFFSET, "length": NONCE_VALUE_LENGTH},
                "encoding": "base58",
            }
        ]),
    );
    let result = rpc.send(request, token).await?;
    let value = result
        .get("value")
        .ok_or_else(|| TransportError::invalid_response("getAccountInfo missing value"))?;
    if value.is_null() {
        return Ok(None);
    }
    let encoded = value
        .get("data")
        .and_then(|data| data.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::invalid_response("getAccountInfo missing account data"))?;
    let nonce = encoded
        .parse::<Hash>()
        .map_err(|_| TransportError::invalid_response("nonce value is not a base58 hash"))?;
    Ok(Some(nonce))
}

pub(crate) fn signature_subscribe_payload(signature: &Signature, commitment: Commitment) -> Value {
    subscription_payload(
        "signatureSubscribe",
        json!([signature.to_string(), {"commitment": commitment.as_str()}]),
    )
}

pub(crate) fn slot_subscribe_payload() -> Value {
    subscription_payload("slotSubscribe", json!([]))
}

pub(crate) fn account_subscribe_payload(account: &Pubkey, commitment: Commitment) -> Value {
    subscription_payload(
        "accountSubscribe",
        json!([
            account.to_string(),
            {"commitment": commitment.as_str(), "encoding": "base64"}
        ]),
    )
}

/// Extract `params.result` from a notification of the given method; `None`
/// for anything else on the channel.
pub(crate) fn notification_result<'a>(message: &'a Value, method: &str) -> Option<&'a Value> {
    if message.get("method").and_then(Value::as_str) != Some(method) {
        return None;
    }
    message.get("params").and_then(|params| params.get("result"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_result_filters_by_method() {
        let message = json!({
            "jsonrpc": "2.0",
            "method": "slotNotification",
            "params": {"result": {"slot": 5}, "subscription": 1},
        });
        assert_eq!(
            notification_result(&message, "slotNotification"),
            Some(&json!({"slot": 5}))
        );
        assert_eq!(notification_result(&message, "accountNotification"), None);
        assert_eq!(notification_result(&json!({"id": 1, "result": 3}), "slotNotification"), None);
    }

    #[test]
    fn test_subscribe_payloads_carry_commitment() {
        let signature = Signature::default();
        let payload = signature_subscribe_payload(&signature, Commitment::Finalized);
        assert_eq!(payload["method"], "signatureSubscribe");
        assert_eq!(payload["params"][1]["commitment"], "finalized");

        let account = Pubkey::new_unique();
        let payload = account_subscribe_payload(&account, Commitment::Confirmed);
        assert_eq!(payload["params"][0], account.to_string());
        assert_eq!(payload["params"][1]["encoding"], "base64");
    }
}
