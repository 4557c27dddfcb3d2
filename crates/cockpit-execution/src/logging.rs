//! Logging bootstrap.

use crate::tracing_layer::{EngineLogEvent, LogForwardLayer};
use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber: an `EnvFilter`, a human-readable `fmt`
/// layer, and optionally a [`LogForwardLayer`] feeding `forward`.
///
/// # Arguments
///
/// * `filter` - Filter directives, e.g. `"info,cockpit_interaction=debug"`
/// * `forward` - Sender for the diagnostics panel, if any
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    filter: &str,
    forward: Option<mpsc::UnboundedSender<EngineLogEvent>>,
) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(resolve_filter(filter))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(forward.map(LogForwardLayer::new))
        .try_init()
        .context("failed to install the tracing subscriber")
}

/// Parses `filter`, falling back to [`DEFAULT_FILTER`] when it is blank or
/// invalid.
pub fn resolve_filter(filter: &str) -> EnvFilter {
    let filter = filter.trim();
    if filter.is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{filter}' ({e}), using '{DEFAULT_FILTER}'");
        EnvFilter::new(DEFAULT_FILTER)
    })
}
