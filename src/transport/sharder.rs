//! WebSocket connection sharding
//!
//! Collapses concurrent subscriptions onto shared physical connections,
//! bucketed by a caller-supplied shard function (default: one global
//! bucket). A connection is opened on the first subscription for a shard and
//! cached immediately, even while still connecting, so concurrent same-tick
//! attempts share it. Each subscriber holds a reference; when the count
//! drops to zero a purge is deferred to the tick boundary, so a
//! re-subscription arriving within the same tick keeps the socket. A
//! connection that fails to open or whose stream ends is evicted and never
//! reused; the next subscription transparently opens a replacement.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cancellation::CancelToken;
use crate::tick::TickBoundary;

use super::errors::TransportError;
use super::{RpcChannel, SubscriptionTransport};

/// Bucket identifier deciding which physical connection a subscription is
/// multiplexed onto.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey(String);

impl ShardKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The single bucket used when no shard function is supplied.
    pub fn global() -> Self {
        Self("global".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type ShardKeyFn = Arc<dyn Fn(&Value) -> ShardKey + Send + Sync>;

type SharedConnect = Shared<BoxFuture<'static, Result<RpcChannel, Arc<TransportError>>>>;

struct RefState {
    count: usize,
    purge_scheduled: bool,
}

struct ShardEntry {
    key: ShardKey,
    refs: Mutex<RefState>,
    /// Connection-scoped token; cancelling it terminates the physical
    /// connection.
    cancel: CancelToken,
    connect: SharedConnect,
}

type ShardCache = Arc<Mutex<HashMap<ShardKey, Arc<ShardEntry>>>>;

/// Wraps a [`SubscriptionTransport`] with reference-counted connection
/// sharing.
pub struct ShardingTransport<S> {
    inner: Arc<S>,
    shard_key: ShardKeyFn,
    tick: Arc<dyn TickBoundary>,
    cache: ShardCache,
}

impl<S: SubscriptionTransport> ShardingTransport<S> {
    pub fn new(inner: S, shard_key: ShardKeyFn, tick: Arc<dyn TickBoundary>) -> Self {
        Self {
            inner: Arc::new(inner),
            shard_key,
            tick,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up or create the entry for `key`, incrementing its reference
    /// count. Returns whether the entry was created by this call.
    fn entry_for(&self, key: ShardKey, payload: &Value) -> (Arc<ShardEntry>, bool) {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(&key) {
            entry.refs.lock().count += 1;
            debug!(shard = %key, "reusing shard connection");
            return (Arc::clone(entry), false);
        }
        let cancel = CancelToken::new();
        let connect: SharedConnect = {
            let inner = Arc::clone(&self.inner);
            let payload = payload.clone();
            let connection_token = cancel.clone();
            async move {
                inner
                    .open(payload, &connection_token)
                    .await
                    .map_err(Arc::new)
            }
            .boxed()
            .shared()
        };
        let entry = Arc::new(ShardEntry {
            key: key.clone(),
            refs: Mutex::new(RefState {
                count: 1,
                purge_scheduled: false,
            }),
            cancel,
            connect,
        });
        cache.insert(key, Arc::clone(&entry));
        (entry, true)
    }

    /// Decrement on caller cancellation; purge at the tick boundary if the
    /// count is still zero there.
    fn release_on_cancel(&self, token: &CancelToken, entry: &Arc<ShardEntry>) {
        let entry = Arc::clone(entry);
        let tick = Arc::clone(&self.tick);
        let cache = Arc::clone(&self.cache);
        token.on_cancel(move |_| {
            let schedule_purge = {
                let mut refs = entry.refs.lock();
                refs.count = refs.count.saturating_sub(1);
                if refs.count == 0 && !refs.purge_scheduled {
                    refs.purge_scheduled = true;
                    true
                } else {
                    false
                }
            };
            if schedule_purge {
                tick.defer(Box::new(move || {
                    let purge = {
                        let mut refs = entry.refs.lock();
                        refs.purge_scheduled = false;
                        refs.count == 0
                    };
                    if purge {
                        debug!(shard = %entry.key, "closing shard connection with no subscribers");
                        entry.cancel.cancel("no subscribers remain on shard connection");
                        evict(&cache, &entry);
                    }
                }));
            }
        });
    }

    /// Watch a freshly created entry and evict it when its connection fails
    /// or its message stream ends.
    fn monitor(&self, entry: &Arc<ShardEntry>) {
        let entry = Arc::clone(entry);
        let cache = Arc::clone(&self.cache);
        let connect = entry.connect.clone();
        tokio::spawn(async move {
            match connect.await {
                Ok(channel) => {
                    let reason = channel.closed().await;
                    debug!(shard = %entry.key, %reason, "shard connection terminated");
                    evict(&cache, &entry);
                }
                Err(error) => {
                    warn!(shard = %entry.key, %error, "shard connection failed to open");
                    evict(&cache, &entry);
                }
            }
        });
    }
}

/// Remove the entry from the cache if it is still the cached one. A
/// replacement entry under the same key is left alone.
fn evict(cache: &ShardCache, entry: &Arc<ShardEntry>) {
    let mut cache = cache.lock();
    if let Some(current) = cache.get(&entry.key) {
        if Arc::ptr_eq(current, entry) {
            cache.remove(&entry.key);
        }
    }
}

#[async_trait]
impl<S: SubscriptionTransport> SubscriptionTransport for ShardingTransport<S> {
    async fn open(&self, payload: Value, token: &CancelToken) -> Result<RpcChannel, TransportError> {
        let key = (self.shard_key)(&payload);
        let (entry, created) = self.entry_for(key, &payload);
        if created {
            self.monitor(&entry);
        }
        self.release_on_cancel(token, &entry);

        let channel = tokio::select! {
            biased;
            reason = token.cancelled() => {
                return Err(TransportError::Cancelled { reason: reason.to_string() });
            }
            connected = entry.connect.clone() => match connected {
                Ok(channel) => channel,
                Err(error) => {
                    evict(&self.cache, &entry);
                    return Err((*error).clone());
                }
            },
        };

        if !created {
            // The connection already exists; deliver this subscription's
            // initial payload over it.
            if let Err(error) = channel.send_raw(payload).await {
                evict(&self.cache, &entry);
                return Err(error);
            }
        }
        Ok(channel)
    }
}
