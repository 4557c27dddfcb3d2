//! Domain layer of the Cockpit assistant session engine.

pub mod config;
pub mod error;
pub mod session;

// Re-export common error type
pub use error::{CockpitError, ErrorKind, Result};
