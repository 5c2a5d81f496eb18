//! HTTP JSON-RPC transport backed by reqwest

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::cancellation::CancelToken;

use super::errors::TransportError;
use super::{RpcRequest, RpcTransport};

/// Request/response transport over HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(TransportError::connection)?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn dispatch(&self, payload: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(TransportError::connection)?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::invalid_response(e.to_string()))?;
        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_string();
            return Err(TransportError::Rpc { code, message });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| TransportError::invalid_response("response missing result field"))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, request: RpcRequest, token: &CancelToken) -> Result<Value, TransportError> {
        if let Some(reason) = token.reason() {
            return Err(TransportError::Cancelled {
                reason: reason.to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = request.to_payload(id);
        debug!(method = %request.method, id, "dispatching RPC request");
        tokio::select! {
            biased;
            reason = token.cancelled() => Err(TransportError::Cancelled {
                reason: reason.to_string(),
            }),
            result = self.dispatch(&payload) => result,
        }
    }
}
