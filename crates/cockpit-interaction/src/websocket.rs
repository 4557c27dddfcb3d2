//! WebSocket implementation of [`StreamingChannel`].

use crate::channel::{InboundFrame, StreamingChannel, WireFrame, decode_frame};
use async_trait::async_trait;
use cockpit_core::config::EngineConfig;
use cockpit_core::session::{Ack, ChannelEvent, ConnectionStatus, OutboundEvent};
use cockpit_core::{CockpitError, Result};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Ack>>>>;

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Streaming channel over a WebSocket carrying JSON text frames.
pub struct WebSocketChannel {
    url: String,
    auth_token: Option<String>,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
            connection: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.ws_url.clone(), config.auth_token.clone())
    }
}

#[async_trait]
impl StreamingChannel for WebSocketChannel {
    async fn open(&self, events: mpsc::UnboundedSender<ChannelEvent>) -> Result<()> {
        self.close().await;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| CockpitError::config(format!("Invalid channel URL '{}': {e}", self.url)))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| CockpitError::config(format!("Invalid auth token: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| CockpitError::transport(format!("WebSocket connect failed: {e}")))?;
        tracing::info!("[WebSocket] Connected to {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!("[WebSocket] Write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = pending.clone();
        let pong = outbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(next) = source.next().await {
                match next {
                    Ok(Message::Text(text)) => match decode_frame(&text) {
                        Ok(InboundFrame::Ack { id, ack }) => {
                            if let Some(waiter) = reader_pending.lock().await.remove(&id) {
                                let _ = waiter.send(ack);
                            } else {
                                tracing::debug!("[WebSocket] Ack {} has no waiter", id);
                            }
                        }
                        Ok(InboundFrame::Event(event)) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("[WebSocket] Discarding malformed frame: {}", e);
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        let _ = pong.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("[WebSocket] Read failed: {}", e);
                        break;
                    }
                }
            }

            // Unblock every emit still waiting for an ack.
            reader_pending.lock().await.clear();
            let _ = events.send(ChannelEvent::Status(ConnectionStatus::Disconnected));
        });

        *self.connection.lock().await = Some(Connection {
            outbound,
            pending,
            reader,
            writer,
        });
        Ok(())
    }

    async fn emit(&self, event: &OutboundEvent) -> Result<Ack> {
        let (outbound, pending) = {
            let connection = self.connection.lock().await;
            let connection = connection
                .as_ref()
                .ok_or_else(|| CockpitError::transport("WebSocket channel is not open"))?;
            (connection.outbound.clone(), connection.pending.clone())
        };

        if !event.expects_ack() {
            let text = WireFrame::outbound(event, None)?.to_text()?;
            outbound
                .send(Message::Text(text))
                .map_err(|_| CockpitError::transport("WebSocket writer has stopped"))?;
            return Ok(Ack::default());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = WireFrame::outbound(event, Some(id))?.to_text()?;
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id, tx);

        if outbound.send(Message::Text(text)).is_err() {
            pending.lock().await.remove(&id);
            return Err(CockpitError::transport("WebSocket writer has stopped"));
        }

        rx.await.map_err(|_| {
            CockpitError::transport(format!(
                "WebSocket closed before '{}' was acknowledged",
                event.name()
            ))
        })
    }

    async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            tracing::debug!("[WebSocket] Closing connection");
            connection.reader.abort();
            connection.writer.abort();
            connection.pending.lock().await.clear();
        }
    }
}
