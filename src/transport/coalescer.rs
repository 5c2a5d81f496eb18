//! Request coalescing
//!
//! Suppresses duplicate concurrent RPC calls: requests carrying the same
//! deduplication key within one tick share a single underlying call and its
//! response (or error). The coalescing window closes at the tick boundary;
//! a same-key request in a later tick always starts a fresh call. Calls
//! already dispatched keep running after the window closes, so late-attached
//! consumers still get their shared response.
//!
//! Per-caller cancellation only withdraws that caller's interest; the
//! underlying call is cancelled once every attached caller has cancelled
//! (checked after a tick deferral, so the count is final).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::cancellation::CancelToken;
use crate::tick::TickBoundary;

use super::errors::TransportError;
use super::{RpcRequest, RpcTransport};

/// Returns the deduplication key for a request, or `None` when the request
/// must not be coalesced.
pub type DedupeKeyFn = Arc<dyn Fn(&RpcRequest) -> Option<String> + Send + Sync>;

type CallResult = Result<Value, Arc<TransportError>>;

struct SharedCall {
    consumers: Mutex<usize>,
    cancel: CancelToken,
    result: watch::Receiver<Option<CallResult>>,
}

/// Wraps an [`RpcTransport`] with per-tick request deduplication.
pub struct CoalescingTransport<T> {
    inner: Arc<T>,
    dedupe_key: DedupeKeyFn,
    tick: Arc<dyn TickBoundary>,
    window: Arc<Mutex<HashMap<String, Arc<SharedCall>>>>,
}

impl<T: RpcTransport> CoalescingTransport<T> {
    pub fn new(inner: T, dedupe_key: DedupeKeyFn, tick: Arc<dyn TickBoundary>) -> Self {
        Self {
            inner: Arc::new(inner),
            dedupe_key,
            tick,
            window: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn attach(&self, key: String, request: &RpcRequest) -> Arc<SharedCall> {
        let mut window = self.window.lock();
        if window.is_empty() {
            // First key this tick: arrange for the window to close at the
            // tick boundary. In-flight calls continue independently.
            let window = Arc::clone(&self.window);
            self.tick.defer(Box::new(move || {
                window.lock().clear();
            }));
        }
        if let Some(call) = window.get(&key) {
            *call.consumers.lock() += 1;
            debug!(%key, "coalesced duplicate request");
            return Arc::clone(call);
        }
        let cancel = CancelToken::new();
        let (result_tx, result_rx) = watch::channel(None);
        let call = Arc::new(SharedCall {
            consumers: Mutex::new(1),
            cancel: cancel.clone(),
            result: result_rx,
        });
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        tokio::spawn(async move {
            let outcome = inner.send(request, &cancel).await.map_err(Arc::new);
            let _ = result_tx.send(Some(outcome));
        });
        window.insert(key, Arc::clone(&call));
        call
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for CoalescingTransport<T> {
    async fn send(&self, request: RpcRequest, token: &CancelToken) -> Result<Value, TransportError> {
        let Some(key) = (self.dedupe_key)(&request) else {
            return self.inner.send(request, token).await;
        };
        let call = self.attach(key, &request);
        let mut result = call.result.clone();
        tokio::select! {
            biased;
            reason = token.cancelled() => {
                let remaining = {
                    let mut consumers = call.consumers.lock();
                    *consumers = consumers.saturating_sub(1);
                    *consumers
                };
                if remaining == 0 {
                    // Final check happens at the tick boundary so a same-tick
                    // attach can still rescue the underlying call.
                    let call = Arc::clone(&call);
                    self.tick.defer(Box::new(move || {
                        if *call.consumers.lock() == 0 {
                            call.cancel.cancel("all coalesced consumers cancelled");
                        }
                    }));
                }
                Err(TransportError::Cancelled { reason: reason.to_string() })
            }
            outcome = wait_for_result(&mut result) => outcome,
        }
    }
}

async fn wait_for_result(
    result: &mut watch::Receiver<Option<CallResult>>,
) -> Result<Value, TransportError> {
    let settled = result
        .wait_for(Option::is_some)
        .await
        .map_err(|_| {
            TransportError::connection("coalesced call task dropped without settling")
        })?
        .clone();
    match settled {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => Err((*error).clone()),
        None => Err(TransportError::invalid_response(
            "coalesced call settled without a result",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::ManualTick;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that counts calls and answers immediately.
    struct CountingTransport {
        calls: AtomicUsize,
    }

    impl CountingTransport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for CountingTransport {
        async fn send(
            &self,
            request: RpcRequest,
            _token: &CancelToken,
        ) -> Result<Value, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "method": request.method, "call": call }))
        }
    }

    fn coalescing_over_counter(
        tick: &ManualTick,
    ) -> (CoalescingTransport<CountingTransport>, Arc<Mutex<HashMap<String, Arc<SharedCall>>>>) {
        let transport = CoalescingTransport::new(
            CountingTransport::new(),
            Arc::new(super::super::dedupe::solana_dedupe_key),
            Arc::new(tick.clone()),
        );
        let window = Arc::clone(&transport.window);
        (transport, window)
    }

    #[tokio::test]
    async fn test_same_tick_duplicates_share_one_call() {
        let tick = ManualTick::new();
        let (transport, _) = coalescing_over_counter(&tick);
        let token = CancelToken::new();

        let request = RpcRequest::new("getSlot", json!([]));
        let (a, b) = tokio::join!(
            transport.send(request.clone(), &token),
            transport.send(request.clone(), &token),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_tick_starts_a_fresh_call() {
        let tick = ManualTick::new();
        let (transport, window) = coalescing_over_counter(&tick);
        let token = CancelToken::new();
        let request = RpcRequest::new("getSlot", json!([]));

        let a = transport.send(request.clone(), &token).await.unwrap();
        tick.run_until_idle();
        assert!(window.lock().is_empty());
        let b = transport.send(request.clone(), &token).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_dedupable_requests_pass_straight_through() {
        let tick = ManualTick::new();
        let (transport, window) = coalescing_over_counter(&tick);
        let token = CancelToken::new();
        let request = RpcRequest::new("sendTransaction", json!(["data"]));

        let (a, b) = tokio::join!(
            transport.send(request.clone(), &token),
            transport.send(request.clone(), &token),
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 2);
        assert!(window.lock().is_empty());
    }
}
