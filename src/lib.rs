//! Reliability core for a Solana JSON-RPC client
//!
//! Turns an unreliable request/response and publish/subscribe transport into
//! dependable primitives: a confirmation engine that races independent,
//! cancellable strategies to learn a transaction's fate as early as
//! possible, and a transport resilience layer that coalesces duplicate
//! requests, keeps WebSocket connections alive, and multiplexes many logical
//! subscriptions onto shared physical connections.

pub mod cancellation;
pub mod commitment;
pub mod config;
pub mod confirm;
pub mod observability;
pub mod tick;
pub mod transport;

// Re-exports for convenience
pub use cancellation::{CancelReason, CancelToken};
pub use commitment::Commitment;
pub use config::Config;
pub use confirm::{ConfirmError, ConfirmationRequest, LifetimeConstraint, TransactionConfirmer};
pub use transport::{RpcTransport, SubscriptionTransport, TransportError};

// Re-export commonly used types
pub use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature};

use std::sync::Arc;

/// The production request transport: HTTP with per-tick request coalescing.
pub type DefaultRpcTransport = transport::CoalescingTransport<transport::HttpTransport>;

/// The production subscription transport: WebSocket with keep-alive pings,
/// shared across subscriptions by the sharder.
pub type DefaultSubscriptionTransport =
    transport::ShardingTransport<transport::AutopingTransport<transport::WsTransport>>;

/// A confirmation engine over the production transport composition.
pub type DefaultConfirmer = TransactionConfirmer<DefaultRpcTransport, DefaultSubscriptionTransport>;

/// Build the production transport composition from a validated config:
/// `coalescing(http)` on the request side, `sharding(autoping(ws))` on the
/// subscription side.
pub fn default_confirmer(config: &Config) -> Result<DefaultConfirmer, TransportError> {
    let http = transport::HttpTransport::new(config.endpoints.http_url.clone())?;
    let ws = transport::WsTransport::new(config.endpoints.ws_url.clone());
    let rpc = Arc::new(transport::coalescing(http));
    let subscriptions = Arc::new(transport::sharding(transport::autoping(
        ws,
        config.websocket.ping_interval(),
    )));
    Ok(TransactionConfirmer::with_settings(
        rpc,
        subscriptions,
        config.confirmation.clone(),
    ))
}
