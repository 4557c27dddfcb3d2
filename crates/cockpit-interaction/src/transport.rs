//! TransportAdapter - one logical connection with request/response fallback.
//!
//! The adapter owns the connection status. A supervisor task keeps the
//! streaming channel open, reconnecting on a bounded exponential schedule
//! while disconnected, and fans inbound events out to subscribers. Sends
//! go over the channel when it is connected and degrade to the
//! [`ConversationBackend`] otherwise, so callers never see which path
//! served them.

use crate::backend::ConversationBackend;
use crate::backoff::ReconnectPolicy;
use crate::channel::StreamingChannel;
use cockpit_core::config::TransportConfig;
use cockpit_core::session::{Ack, ChannelEvent, ConnectionStatus, OutboundEvent};
use cockpit_core::{CockpitError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which path served a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Streaming,
    Fallback,
    /// Fire-and-forget event discarded because only the fallback was available.
    Dropped,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub ack: Ack,
    pub route: Route,
}

impl Delivery {
    /// True when the complete reply travelled inside the ack.
    pub fn carries_reply(&self) -> bool {
        self.route == Route::Fallback
    }
}

struct Shared {
    channel: Arc<dyn StreamingChannel>,
    backend: Arc<dyn ConversationBackend>,
    policy: ReconnectPolicy,
    ack_timeout: Duration,
    status: watch::Sender<ConnectionStatus>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl Shared {
    /// Transitions the status and, on change, tells subscribers.
    async fn set_status(&self, next: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!("[Transport] Connection status: {}", next);
            self.fan_out(ChannelEvent::Status(next)).await;
        }
    }

    async fn fan_out(&self, event: ChannelEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// Real-time transport with automatic degradation to request/response calls.
pub struct TransportAdapter {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TransportAdapter {
    pub fn new(
        channel: Arc<dyn StreamingChannel>,
        backend: Arc<dyn ConversationBackend>,
        config: &TransportConfig,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            shared: Arc::new(Shared {
                channel,
                backend,
                policy: ReconnectPolicy::from_config(config),
                ack_timeout: config.ack_timeout(),
                status,
                subscribers: Mutex::new(Vec::new()),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the connection supervisor. No-op if it is already running.
    pub async fn connect(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
        {
            return;
        }

        self.shared.set_status(ConnectionStatus::Connecting).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(self.shared.clone(), cancel.clone()));
        *supervisor = Some((cancel, handle));
    }

    /// Stops reconnecting and closes the channel.
    pub async fn disconnect(&self) {
        if let Some((cancel, handle)) = self.supervisor.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("[Transport] Supervisor task ended abnormally: {}", e);
            }
        }
        self.shared.channel.close().await;
        self.shared.set_status(ConnectionStatus::Disconnected).await;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Registers a lossless receiver for every inbound event, including
    /// status transitions. Dropping the receiver unsubscribes.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().await.push(tx);
        rx
    }

    /// The request/response backend, for calls that have no streaming form.
    pub fn backend(&self) -> Arc<dyn ConversationBackend> {
        self.shared.backend.clone()
    }

    /// Sends an event over whichever path is available.
    ///
    /// # Returns
    ///
    /// The acknowledgement and the path that served it.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the streaming channel does not acknowledge within
    ///   `ack_timeout`. The send is not retried on the fallback.
    /// - Any error of the fallback call.
    pub async fn send(&self, event: &OutboundEvent) -> Result<Delivery> {
        if self.shared.status() == ConnectionStatus::Connected {
            match tokio::time::timeout(self.shared.ack_timeout, self.shared.channel.emit(event))
                .await
            {
                Ok(Ok(ack)) => {
                    return Ok(Delivery {
                        ack,
                        route: Route::Streaming,
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        "[Transport] Streaming emit of '{}' failed, degrading to fallback: {}",
                        event.name(),
                        e
                    );
                    self.shared.channel.close().await;
                    self.shared.set_status(ConnectionStatus::Disconnected).await;
                }
                Err(_) => {
                    tracing::warn!(
                        "[Transport] No ack for '{}' within {:?}",
                        event.name(),
                        self.shared.ack_timeout
                    );
                    return Err(CockpitError::timeout(
                        event.name(),
                        self.shared.ack_timeout.as_millis() as u64,
                    ));
                }
            }
        }

        self.send_fallback(event).await
    }

    async fn send_fallback(&self, event: &OutboundEvent) -> Result<Delivery> {
        tracing::debug!("[Transport] Serving '{}' via fallback", event.name());
        let backend = &self.shared.backend;
        let ack = match event {
            OutboundEvent::SendMessage(request) => backend.send_message(request).await?,
            OutboundEvent::Regenerate(request) => backend.regenerate(request).await?,
            OutboundEvent::StopGeneration(request) => {
                backend.stop_generation(request).await?;
                Ack {
                    conversation_id: Some(request.conversation_id.clone()),
                    ..Ack::default()
                }
            }
            OutboundEvent::Typing(_) => {
                return Ok(Delivery {
                    ack: Ack::default(),
                    route: Route::Dropped,
                });
            }
        };
        Ok(Delivery {
            ack,
            route: Route::Fallback,
        })
    }
}

/// Keeps the channel open until cancelled.
async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.channel.open(tx) => result,
        };

        match opened {
            Ok(()) => {
                attempt = 0;
                shared.set_status(ConnectionStatus::Connected).await;

                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => return,
                        event = rx.recv() => event,
                    };
                    match event {
                        None | Some(ChannelEvent::Status(ConnectionStatus::Disconnected)) => break,
                        Some(ChannelEvent::Status(_)) => {}
                        Some(event) => shared.fan_out(event).await,
                    }
                }

                tracing::warn!("[Transport] Streaming channel dropped");
                shared.channel.close().await;
            }
            Err(e) => {
                tracing::warn!(
                    "[Transport] Connect attempt {} failed: {}",
                    attempt + 1,
                    e
                );
            }
        }

        shared.set_status(ConnectionStatus::Disconnected).await;

        let delay = shared.policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        tracing::debug!("[Transport] Reconnecting in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
