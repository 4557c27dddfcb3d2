//! Cockpit interaction layer.
//!
//! Everything that talks to the outside world: the streaming channel, the
//! request/response fallback, attachment uploads, and the
//! [`TransportAdapter`] that chooses between them.

pub mod backend;
pub mod backoff;
pub mod channel;
pub mod http_backend;
pub mod transport;
pub mod uploader;
pub mod websocket;

pub use backend::ConversationBackend;
pub use backoff::ReconnectPolicy;
pub use channel::{InboundFrame, StreamingChannel, WireFrame, decode_frame};
pub use http_backend::HttpBackend;
pub use transport::{Delivery, Route, TransportAdapter};
pub use uploader::{AttachmentUploader, HttpUploader, ProgressCallback, UploadFile, UploadProgress};
pub use websocket::WebSocketChannel;
