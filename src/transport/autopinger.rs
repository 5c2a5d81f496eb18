//! WebSocket keep-alive
//!
//! Wraps a subscription transport so idle connections are kept alive: after
//! `interval` with no outbound send and no inbound message, a protocol-level
//! ping is sent. Any traffic in either direction resets the idle clock. The
//! pinger stops permanently once the connection's message stream ends or the
//! connection token cancels.
//!
//! Pings travel through the same send path as application messages, so an
//! observer of the channel cannot tell them apart except by payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cancellation::CancelToken;

use super::errors::TransportError;
use super::{ChannelSink, RpcChannel, SubscriptionTransport};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(5_000);

/// Keep-alive wire payload: fire-and-forget, no id.
pub fn ping_payload() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "ping",
    })
}

/// Wraps a [`SubscriptionTransport`] with idle keep-alive pings.
pub struct AutopingTransport<S> {
    inner: S,
    interval: Duration,
}

impl<S: SubscriptionTransport> AutopingTransport<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self { inner, interval }
    }
}

/// Send path that records outbound activity for the idle timer.
struct ActivitySink {
    inner: Arc<dyn ChannelSink>,
    activity: Arc<watch::Sender<Instant>>,
}

#[async_trait]
impl ChannelSink for ActivitySink {
    async fn send_raw(&self, payload: Value) -> Result<(), TransportError> {
        self.inner.send_raw(payload).await?;
        let _ = self.activity.send(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl<S: SubscriptionTransport> SubscriptionTransport for AutopingTransport<S> {
    async fn open(&self, payload: Value, token: &CancelToken) -> Result<RpcChannel, TransportError> {
        let channel = self.inner.open(payload, token).await?;

        let (activity_tx, activity_rx) = watch::channel(Instant::now());
        let activity_tx = Arc::new(activity_tx);
        let pinging_channel = channel.with_sink(Arc::new(ActivitySink {
            inner: channel.sink(),
            activity: Arc::clone(&activity_tx),
        }));

        let interval = self.interval;
        let stop = token.child();
        let ping_sender = pinging_channel.clone();
        let mut inbound = channel.messages();
        let mut activity = activity_rx;
        tokio::spawn(async move {
            loop {
                let deadline = *activity.borrow() + interval;
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    message = inbound.next() => match message {
                        // Inbound traffic resets the idle clock.
                        Some(_) => {
                            let _ = activity_tx.send(Instant::now());
                        }
                        // Stream ended: never ping again.
                        None => break,
                    },
                    changed = activity.changed() => {
                        // Outbound traffic; the deadline is recomputed above.
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        trace!("connection idle, sending keep-alive ping");
                        if ping_sender.send_raw(ping_payload()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("autopinger stopped");
        });

        Ok(pinging_channel)
    }
}
