//! Builds a [`SessionOrchestrator`] from the on-disk configuration.

use anyhow::Context;
use cockpit_application::SessionOrchestrator;
use cockpit_core::config::EngineConfig;
use cockpit_infrastructure::{CockpitPaths, ConfigService, TomlPreferencesRepository};
use cockpit_interaction::{HttpBackend, HttpUploader, TransportAdapter, WebSocketChannel};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::logging::init_logging;
use crate::tracing_layer::EngineLogEvent;

/// Resolved configuration plus the file locations the engine uses.
#[derive(Debug, Clone)]
pub struct EngineBootstrap {
    paths: CockpitPaths,
    config: EngineConfig,
}

impl EngineBootstrap {
    /// Loads the configuration, writing defaults on first run.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory holding `config.toml` and `preferences.toml`;
    ///   `None` uses `~/.config/cockpit`
    pub fn load(root: Option<PathBuf>) -> anyhow::Result<Self> {
        let paths = CockpitPaths::new(root);
        let config = ConfigService::new(paths.clone())
            .get_config()
            .context("failed to load engine configuration")?;
        Ok(Self { paths, config })
    }

    pub fn with_config(paths: CockpitPaths, config: EngineConfig) -> Self {
        Self { paths, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Installs logging with the configured filter.
    pub fn init_logging(
        &self,
        forward: Option<mpsc::UnboundedSender<EngineLogEvent>>,
    ) -> anyhow::Result<()> {
        init_logging(&self.config.log_filter, forward)
    }

    /// Wires the WebSocket channel, HTTP fallback, uploader and preferences
    /// file into an orchestrator. Nothing connects until
    /// [`SessionOrchestrator::mount`] is called.
    pub fn build(&self) -> anyhow::Result<SessionOrchestrator> {
        let backend =
            HttpBackend::from_config(&self.config).context("failed to build the HTTP backend")?;
        let channel = WebSocketChannel::from_config(&self.config);
        let transport = TransportAdapter::new(
            Arc::new(channel),
            Arc::new(backend),
            &self.config.transport,
        );
        let uploader =
            HttpUploader::from_config(&self.config).context("failed to build the uploader")?;
        let preferences = TomlPreferencesRepository::default_location(&self.paths)
            .context("failed to locate preferences")?;

        tracing::info!(
            "[Bootstrap] Engine wired (api: {}, ws: {})",
            self.config.api_base_url,
            self.config.ws_url
        );
        Ok(SessionOrchestrator::new(
            Arc::new(transport),
            Arc::new(uploader),
            Arc::new(preferences),
            &self.config,
        ))
    }
}
