//! Application layer of the Cockpit assistant session engine.
//!
//! [`SessionOrchestrator`] turns user intents into state transitions and
//! transport calls; the components it composes live in [`session`].

pub mod session;

pub use session::{SessionOrchestrator, SessionSnapshot};
