//! Transport layer
//!
//! Narrow interfaces over the two flavors of JSON-RPC transport (HTTP-like
//! request/response and WebSocket-like subscription channels), plus the
//! resilience wrappers layered on top of them: request coalescing for the
//! HTTP side, keep-alive pinging and connection sharding for the WebSocket
//! side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::warn;

use crate::cancellation::{CancelReason, CancelToken};
use crate::tick::SpawnTick;

// Submodules
pub mod autopinger;
pub mod coalescer;
pub mod dedupe;
pub mod errors;
pub mod http;
pub mod sharder;
pub mod ws;

// Re-exports for convenience
pub use autopinger::{AutopingTransport, DEFAULT_PING_INTERVAL};
pub use coalescer::CoalescingTransport;
pub use errors::TransportError;
pub use http::HttpTransport;
pub use sharder::{ShardKey, ShardingTransport};
pub use ws::WsTransport;

/// A JSON-RPC request before id assignment. The transport assigns the id;
/// callers and the coalescer only ever look at method and params.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Full JSON-RPC envelope for the wire.
    pub fn to_payload(&self, id: u64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": self.method,
            "params": self.params,
        })
    }
}

static NEXT_SUBSCRIPTION_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// JSON-RPC envelope for a subscription request sent over a WebSocket
/// channel.
pub fn subscription_payload(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": NEXT_SUBSCRIPTION_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
        "method": method,
        "params": params,
    })
}

/// Request/response transport (HTTP-like).
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Issue a call; resolves with the JSON-RPC `result` value or an error.
    /// Must return promptly with [`TransportError::Cancelled`] when `token`
    /// fires.
    async fn send(&self, request: RpcRequest, token: &CancelToken) -> Result<Value, TransportError>;
}

/// Subscription transport (WebSocket-like).
///
/// `token` governs the connection's lifetime: implementations must terminate
/// the returned channel (closing its message stream) when it is cancelled.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync + 'static {
    /// Open a connection and send `payload` as its initial message.
    async fn open(&self, payload: Value, token: &CancelToken) -> Result<RpcChannel, TransportError>;
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for Arc<T> {
    async fn send(&self, request: RpcRequest, token: &CancelToken) -> Result<Value, TransportError> {
        (**self).send(request, token).await
    }
}

#[async_trait]
impl<S: SubscriptionTransport + ?Sized> SubscriptionTransport for Arc<S> {
    async fn open(&self, payload: Value, token: &CancelToken) -> Result<RpcChannel, TransportError> {
        (**self).open(payload, token).await
    }
}

/// Outbound half of a channel. Kept as a trait object so wrappers (the
/// autopinger) can interpose on the send path without the consumer being able
/// to tell.
#[async_trait]
pub trait ChannelSink: Send + Sync + 'static {
    async fn send_raw(&self, payload: Value) -> Result<(), TransportError>;
}

struct ChannelShared {
    inbound: broadcast::Sender<Value>,
    closed: CancelToken,
}

/// A live connection: an unbounded, cancellable sequence of inbound messages
/// plus a raw send operation. Cloning yields another handle to the same
/// physical connection.
#[derive(Clone)]
pub struct RpcChannel {
    sink: Arc<dyn ChannelSink>,
    shared: Arc<ChannelShared>,
}

const INBOUND_BUFFER: usize = 1024;

impl RpcChannel {
    /// Create a channel backed by `sink`, together with the controller the
    /// owning transport uses to deliver inbound messages and signal
    /// termination.
    pub fn new(sink: Arc<dyn ChannelSink>) -> (Self, ChannelController) {
        let (inbound, _) = broadcast::channel(INBOUND_BUFFER);
        let closed = CancelToken::new();
        let shared = Arc::new(ChannelShared {
            inbound: inbound.clone(),
            closed: closed.clone(),
        });
        (
            Self { sink, shared },
            ChannelController { inbound, closed },
        )
    }

    /// Send a payload over the connection.
    pub async fn send_raw(&self, payload: Value) -> Result<(), TransportError> {
        if let Some(reason) = self.shared.closed.reason() {
            return Err(TransportError::ChannelClosed {
                reason: reason.to_string(),
            });
        }
        self.sink.send_raw(payload).await
    }

    /// Subscribe to the inbound message sequence. Each subscriber sees every
    /// message delivered after it subscribes; the sequence ends when the
    /// connection terminates.
    pub fn messages(&self) -> ChannelMessages {
        ChannelMessages {
            rx: self.shared.inbound.subscribe(),
            closed: self.shared.closed.clone(),
        }
    }

    /// Resolves with the close reason once the connection terminates.
    pub async fn closed(&self) -> CancelReason {
        self.shared.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    pub(crate) fn sink(&self) -> Arc<dyn ChannelSink> {
        Arc::clone(&self.sink)
    }

    /// Same connection, different send path.
    pub(crate) fn with_sink(&self, sink: Arc<dyn ChannelSink>) -> RpcChannel {
        RpcChannel {
            sink,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Producer-side handle paired with an [`RpcChannel`].
#[derive(Clone)]
pub struct ChannelController {
    inbound: broadcast::Sender<Value>,
    closed: CancelToken,
}

impl ChannelController {
    /// Deliver an inbound message to every subscriber.
    pub fn deliver(&self, message: Value) {
        // Send only fails when no subscriber exists, which is fine.
        let _ = self.inbound.send(message);
    }

    /// Terminate the connection. Idempotent.
    pub fn close(&self, reason: impl Into<CancelReason>) {
        self.closed.cancel(reason);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Inbound message sequence of one [`RpcChannel`] subscriber.
pub struct ChannelMessages {
    rx: broadcast::Receiver<Value>,
    closed: CancelToken,
}

impl ChannelMessages {
    /// Next inbound message, or `None` once the connection has terminated.
    /// Messages delivered before termination are drained first.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            tokio::select! {
                biased;
                result = self.rx.recv() => match result {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscription consumer lagged behind inbound messages");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = self.closed.cancelled() => return None,
            }
        }
    }
}

/// Wrap a request transport with per-tick request coalescing using the
/// standard dedup key.
pub fn coalescing<T: RpcTransport>(transport: T) -> CoalescingTransport<T> {
    CoalescingTransport::new(transport, Arc::new(dedupe::solana_dedupe_key), Arc::new(SpawnTick))
}

/// Wrap a subscription transport with idle keep-alive pings.
pub fn autoping<S: SubscriptionTransport>(transport: S, interval: Duration) -> AutopingTransport<S> {
    AutopingTransport::new(transport, interval)
}

/// Wrap a subscription transport so all subscriptions share one physical
/// connection per shard key (default: a single global shard).
pub fn sharding<S: SubscriptionTransport>(transport: S) -> ShardingTransport<S> {
    ShardingTransport::new(
        transport,
        Arc::new(|_payload: &Value| ShardKey::global()),
        Arc::new(SpawnTick),
    )
}
