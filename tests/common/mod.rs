//! Shared mock transports for integration tests
//!
//! The mocks honor the transport contracts the production implementations
//! honor: request cancellation returns a cancellation error, and the token
//! passed to `open` governs the connection's lifetime (cancelling it closes
//! the channel).

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use txconfirm::cancellation::CancelToken;
use txconfirm::transport::{
    ChannelController, ChannelSink, RpcChannel, RpcRequest, RpcTransport, SubscriptionTransport,
    TransportError,
};

/// Yield enough times for spawned tasks to settle on the current-thread
/// runtime.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Scripted request transport
// ---------------------------------------------------------------------------

pub enum MockReply {
    Value(Value),
    Error(TransportError),
}

/// Request transport that answers from per-method scripted reply queues.
/// Calls with no scripted reply park until cancelled, like a strategy branch
/// waiting on a server that never answers.
pub struct MockRpcTransport {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<RpcRequest>>,
}

impl MockRpcTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn enqueue(&self, method: &str, reply: MockReply) {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn enqueue_value(&self, method: &str, value: Value) {
        self.enqueue(method, MockReply::Value(value));
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .count()
    }
}

#[async_trait]
impl RpcTransport for MockRpcTransport {
    async fn send(&self, request: RpcRequest, token: &CancelToken) -> Result<Value, TransportError> {
        let reply = {
            self.calls.lock().push(request.clone());
            self.replies
                .lock()
                .get_mut(&request.method)
                .and_then(VecDeque::pop_front)
        };
        match reply {
            Some(MockReply::Value(value)) => Ok(value),
            Some(MockReply::Error(error)) => Err(error),
            None => {
                let reason = token.cancelled().await;
                Err(TransportError::Cancelled {
                    reason: reason.to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Manually-resolved request transport (for coalescing tests)
// ---------------------------------------------------------------------------

pub struct PendingCall {
    pub request: RpcRequest,
    pub token: CancelToken,
    responder: oneshot::Sender<Result<Value, TransportError>>,
}

impl PendingCall {
    pub fn respond(self, result: Result<Value, TransportError>) {
        let _ = self.responder.send(result);
    }
}

/// Request transport whose calls stay in flight until the test resolves
/// them.
#[derive(Default)]
pub struct ManualRpcTransport {
    pending: Mutex<Vec<PendingCall>>,
    total_calls: Mutex<usize>,
}

impl ManualRpcTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn total_calls(&self) -> usize {
        *self.total_calls.lock()
    }

    pub fn take_pending(&self) -> Vec<PendingCall> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn respond_all(&self, result: Result<Value, TransportError>) {
        for call in self.take_pending() {
            call.respond(result.clone());
        }
    }
}

#[async_trait]
impl RpcTransport for ManualRpcTransport {
    async fn send(&self, request: RpcRequest, token: &CancelToken) -> Result<Value, TransportError> {
        let (responder, resolved) = oneshot::channel();
        {
            *self.total_calls.lock() += 1;
            self.pending.lock().push(PendingCall {
                request,
                token: token.clone(),
                responder,
            });
        }
        tokio::select! {
            biased;
            reason = token.cancelled() => Err(TransportError::Cancelled {
                reason: reason.to_string(),
            }),
            result = resolved => result.unwrap_or_else(|_| {
                Err(TransportError::Connection {
                    message: "test dropped the pending call".to_string(),
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted subscription transport
// ---------------------------------------------------------------------------

struct RecordingSink {
    sent: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn send_raw(&self, payload: Value) -> Result<(), TransportError> {
        self.sent.lock().push(payload);
        Ok(())
    }
}

/// One mock physical connection: the payload that opened it, the producer
/// controller, and everything sent over it after opening.
#[derive(Clone)]
pub struct MockConnection {
    pub payload: Value,
    pub controller: ChannelController,
    pub channel: RpcChannel,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl MockConnection {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn method(&self) -> Option<String> {
        self.payload
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Subscription transport handing out in-memory connections the test drives
/// directly.
#[derive(Default)]
pub struct MockSubscriptionTransport {
    connections: Mutex<Vec<MockConnection>>,
    open_failures: Mutex<VecDeque<TransportError>>,
}

impl MockSubscriptionTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `open` fail with `error` instead of connecting.
    pub fn fail_next_open(&self, error: TransportError) {
        self.open_failures.lock().push_back(error);
    }

    pub fn open_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> MockConnection {
        self.connections.lock()[index].clone()
    }

    pub fn connection_for(&self, method: &str) -> Option<MockConnection> {
        self.connections
            .lock()
            .iter()
            .find(|conn| conn.method().as_deref() == Some(method))
            .cloned()
    }

    /// Wait until a connection whose initial payload carries `method` has
    /// been opened.
    pub async fn wait_for_connection(&self, method: &str) -> MockConnection {
        for _ in 0..200 {
            if let Some(connection) = self.connection_for(method) {
                return connection;
            }
            tokio::task::yield_now().await;
        }
        panic!("no connection opened for {method}");
    }
}

#[async_trait]
impl SubscriptionTransport for MockSubscriptionTransport {
    async fn open(&self, payload: Value, token: &CancelToken) -> Result<RpcChannel, TransportError> {
        if let Some(reason) = token.reason() {
            return Err(TransportError::Cancelled {
                reason: reason.to_string(),
            });
        }
        if let Some(error) = self.open_failures.lock().pop_front() {
            return Err(error);
        }
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (channel, controller) = RpcChannel::new(Arc::new(RecordingSink {
            sent: Arc::clone(&sent),
        }));
        {
            let controller = controller.clone();
            token.on_cancel(move |reason| controller.close(reason.clone()));
        }
        self.connections.lock().push(MockConnection {
            payload,
            controller,
            channel: channel.clone(),
            sent,
        });
        Ok(channel)
    }
}

// ---------------------------------------------------------------------------
// Notification payload builders
// ---------------------------------------------------------------------------

pub fn signature_notification(err: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "signatureNotification",
        "params": {
            "result": {"context": {"slot": 1}, "value": {"err": err}},
            "subscription": 1,
        }
    })
}

pub fn slot_notification(slot: u64) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "slotNotification",
        "params": {
            "result": {"parent": slot.saturating_sub(1), "root": slot.saturating_sub(32), "slot": slot},
            "subscription": 2,
        }
    })
}

pub fn account_notification(base64_data: String) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "accountNotification",
        "params": {
            "result": {
                "context": {"slot": 1},
                "value": {
                    "data": [base64_data, "base64"],
                    "executable": false,
                    "lamports": 1_447_680,
                    "owner": "11111111111111111111111111111111",
                    "rentEpoch": 0,
                }
            },
            "subscription": 3,
        }
    })
}
