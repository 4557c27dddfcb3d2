//! Process wiring for the Cockpit session engine: logging and the
//! construction of a ready-to-mount [`SessionOrchestrator`].
//!
//! [`SessionOrchestrator`]: cockpit_application::SessionOrchestrator

pub mod bootstrap;
pub mod logging;
pub mod tracing_layer;

pub use bootstrap::EngineBootstrap;
pub use logging::init_logging;
pub use tracing_layer::{EngineLogEvent, LogForwardLayer};
