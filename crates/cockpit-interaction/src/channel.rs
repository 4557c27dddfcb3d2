//! Streaming channel abstraction and its JSON wire framing.

use async_trait::async_trait;
use cockpit_core::session::{Ack, ChannelEvent, OutboundEvent};
use cockpit_core::{CockpitError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Event name of acknowledgement frames.
pub const ACK_EVENT: &str = "ack";

/// A bidirectional real-time channel to the assistant backend.
///
/// Implementations push every inbound event into the sender handed to
/// [`StreamingChannel::open`]. A dropped connection is reported either by
/// pushing `ChannelEvent::Status(Disconnected)` or by dropping the sender.
#[async_trait]
pub trait StreamingChannel: Send + Sync {
    /// Establishes the connection.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error when the handshake fails.
    async fn open(&self, events: mpsc::UnboundedSender<ChannelEvent>) -> Result<()>;

    /// Sends one outbound event.
    ///
    /// Events that expect an acknowledgement resolve once the backend acks
    /// them; fire-and-forget events resolve with an empty [`Ack`] as soon as
    /// the frame is written. The caller bounds the wait.
    async fn emit(&self, event: &OutboundEvent) -> Result<Ack>;

    /// Tears the connection down. Safe to call when already closed.
    async fn close(&self);
}

/// One JSON text frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl WireFrame {
    /// Builds the frame for an outbound event, tagging it with `id` when the
    /// event expects an acknowledgement.
    pub fn outbound(event: &OutboundEvent, id: Option<u64>) -> Result<Self> {
        Ok(Self {
            event: event.name().to_string(),
            payload: event.payload()?,
            id: if event.expects_ack() { id } else { None },
        })
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ack { id: u64, ack: Ack },
    Event(ChannelEvent),
}

/// Parses an inbound text frame.
///
/// # Errors
///
/// Returns a `Serialization` error for malformed JSON or payloads, and a
/// `Transport` error for unknown event names or acks without an id.
pub fn decode_frame(text: &str) -> Result<InboundFrame> {
    let frame: WireFrame = serde_json::from_str(text)?;

    if frame.event == ACK_EVENT {
        let id = frame
            .id
            .ok_or_else(|| CockpitError::transport("ack frame without id"))?;
        let ack = if frame.payload.is_null() {
            Ack::default()
        } else {
            serde_json::from_value(frame.payload)?
        };
        return Ok(InboundFrame::Ack { id, ack });
    }

    ChannelEvent::parse(&frame.event, frame.payload).map(InboundFrame::Event)
}
