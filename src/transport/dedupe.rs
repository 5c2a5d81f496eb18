//! Deduplication keys for request coalescing
//!
//! Two requests are duplicates when their `[method, params]` pair serializes
//! identically after object keys are recursively sorted. Request ids never
//! participate in the key, and key order inside params is irrelevant.

use serde_json::Value;

use super::RpcRequest;

/// Methods that mutate server state and must never be coalesced.
const NON_DEDUPABLE_METHODS: &[&str] = &["sendTransaction", "requestAirdrop"];

/// Deduplication key for a request, or `None` when the payload must not be
/// coalesced.
pub fn solana_dedupe_key(request: &RpcRequest) -> Option<String> {
    if NON_DEDUPABLE_METHODS.contains(&request.method.as_str()) {
        return None;
    }
    let key = Value::Array(vec![
        Value::String(request.method.clone()),
        canonicalize(&request.params),
    ]);
    Some(key.to_string())
}

/// Recursively sort object keys so serialization is order-insensitive.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
