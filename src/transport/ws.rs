//! WebSocket JSON-RPC transport backed by tokio-tungstenite
//!
//! Each `open` establishes one physical connection; a driver task pumps
//! outbound payloads to the socket and inbound text frames into the
//! channel's broadcast. The channel closes, with a reason, when the socket
//! ends, errors, or the connection token cancels.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::cancellation::CancelToken;

use super::errors::TransportError;
use super::{ChannelController, ChannelSink, RpcChannel, SubscriptionTransport};

const OUTBOUND_BUFFER: usize = 64;

/// Subscription transport that opens one WebSocket per `open` call. Meant to
/// be wrapped as `sharding(autoping(WsTransport::new(url)))`.
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

struct WsSink {
    outbound: mpsc::Sender<Value>,
}

#[async_trait]
impl ChannelSink for WsSink {
    async fn send_raw(&self, payload: Value) -> Result<(), TransportError> {
        self.outbound
            .send(payload)
            .await
            .map_err(|_| TransportError::ChannelClosed {
                reason: "connection driver ended".to_string(),
            })
    }
}

#[async_trait]
impl SubscriptionTransport for WsTransport {
    async fn open(&self, payload: Value, token: &CancelToken) -> Result<RpcChannel, TransportError> {
        if let Some(reason) = token.reason() {
            return Err(TransportError::Cancelled {
                reason: reason.to_string(),
            });
        }
        let socket = tokio::select! {
            biased;
            reason = token.cancelled() => {
                return Err(TransportError::Cancelled { reason: reason.to_string() });
            }
            connected = connect_async(&self.url) => {
                let (socket, _response) = connected.map_err(TransportError::connection)?;
                socket
            }
        };
        debug!(url = %self.url, "websocket connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (channel, controller) = RpcChannel::new(Arc::new(WsSink {
            outbound: outbound_tx,
        }));
        tokio::spawn(drive_connection(
            socket,
            outbound_rx,
            controller,
            token.clone(),
        ));

        channel.send_raw(payload).await?;
        Ok(channel)
    }
}

async fn drive_connection(
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut outbound: mpsc::Receiver<Value>,
    controller: ChannelController,
    token: CancelToken,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            biased;
            reason = token.cancelled() => {
                let _ = sink.close().await;
                controller.close(reason);
                break;
            }
            queued = outbound.recv() => match queued {
                Some(payload) => {
                    if let Err(error) = sink.send(Message::Text(payload.to_string())).await {
                        controller.close(format!("send failed: {error}"));
                        break;
                    }
                }
                // All channel handles dropped; nothing left to serve.
                None => {
                    let _ = sink.close().await;
                    controller.close("all channel handles dropped");
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(message) => controller.deliver(message),
                    Err(error) => warn!(%error, "discarding unparseable inbound frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    controller.close("connection closed by server");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary and ping/pong frames carry no JSON-RPC payload.
                }
                Some(Err(error)) => {
                    controller.close(format!("connection error: {error}"));
                    break;
                }
            },
        }
    }
}
