//! Signaling channel to the relay

use cheenhub_contracts::signaling::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{CallError, Result};
use crate::events::{CallEvent, EventSender};

/// Outbound half of the relay connection.
///
/// Sends are fire-and-forget. Inbound traffic and connect/disconnect
/// notifications arrive on the orchestrator's event queue.
pub trait SignalingChannel: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<()>;
}

/// WebSocket signaling client that keeps reconnecting until dropped
pub struct WsSignaling {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    task: JoinHandle<()>,
}

impl WsSignaling {
    /// Start the connection task. Inbound messages go to `events`.
    pub fn spawn(url: impl Into<String>, reconnect_delay: Duration, events: EventSender) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(url.into(), reconnect_delay, outbound_rx, events));
        Self { outbound, task }
    }
}

impl SignalingChannel for WsSignaling {
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| CallError::ChannelClosed("signaling task stopped".to_string()))
    }
}

impl Drop for WsSignaling {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    url: String,
    reconnect_delay: Duration,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: EventSender,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!("Signaling connected to {}", url);
                if !events.send(CallEvent::SignalingConnected) {
                    return;
                }

                let (mut sink, mut stream) = socket.split();
                loop {
                    tokio::select! {
                        message = outbound.recv() => {
                            let Some(message) = message else {
                                // Every sender is gone, nothing left to deliver.
                                let _ = sink.close().await;
                                return;
                            };
                            let text = match serde_json::to_string(&message) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Failed to encode signaling message: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                warn!("Signaling send failed: {}", e);
                                break;
                            }
                        }
                        frame = stream.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerMessage>(&text) {
                                        Ok(message) => {
                                            debug!("Signaling received {}", message.event_name());
                                            if !events.send(CallEvent::Signal(message)) {
                                                return;
                                            }
                                        }
                                        Err(e) => warn!("Ignoring undecodable signaling frame: {}", e),
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if sink.send(Message::Pong(data)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    info!("Signaling connection closed by relay");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("Signaling connection error: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }

                if !events.send(CallEvent::SignalingDisconnected) {
                    return;
                }
            }
            Err(e) => warn!("Signaling connect to {} failed: {}", url, e),
        }

        tokio::time::sleep(reconnect_delay).await;

        // Offers and candidates queued while offline belong to connections the
        // orchestrator will renegotiate after reconnecting.
        let mut dropped = 0usize;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} signaling messages queued while offline", dropped);
        }
    }
}
