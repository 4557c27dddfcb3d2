//! Configuration service.
//!
//! Loads [`EngineConfig`] from `~/.config/cockpit/config.toml`, writing the
//! defaults when the file does not exist yet, and applies environment
//! overrides on top.

use crate::paths::CockpitPaths;
use crate::storage::TomlDocument;
use cockpit_core::config::EngineConfig;
use cockpit_core::{CockpitError, Result};
use std::sync::{Arc, RwLock};

pub const ENV_API_BASE_URL: &str = "COCKPIT_API_BASE_URL";
pub const ENV_WS_URL: &str = "COCKPIT_WS_URL";
pub const ENV_AUTH_TOKEN: &str = "COCKPIT_AUTH_TOKEN";
pub const ENV_LOG: &str = "COCKPIT_LOG";

/// Loads and caches the engine configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    paths: CockpitPaths,
    config: Arc<RwLock<Option<EngineConfig>>>,
}

impl ConfigService {
    pub fn new(paths: CockpitPaths) -> Self {
        Self {
            paths,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns the configuration, loading it on first access.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed, or when the
    /// defaults cannot be written.
    pub fn get_config(&self) -> Result<EngineConfig> {
        if let Some(cached) = self
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            return Ok(cached.clone());
        }

        let mut loaded = self.load_from_disk()?;
        apply_env_overrides(&mut loaded, |key| std::env::var(key).ok());

        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(loaded.clone());
        Ok(loaded)
    }

    /// Drops the cached copy so the next access re-reads the file.
    pub fn invalidate_cache(&self) {
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    fn load_from_disk(&self) -> Result<EngineConfig> {
        let path = self
            .paths
            .config_file()
            .map_err(|e| CockpitError::config(e.to_string()))?;
        let document = TomlDocument::<EngineConfig>::new(path);

        match document.load()? {
            Some(config) => Ok(config),
            None => {
                let defaults = EngineConfig::default();
                tracing::info!(
                    "[ConfigService] Writing default configuration to {}",
                    document.path().display()
                );
                document.save(&defaults)?;
                Ok(defaults)
            }
        }
    }
}

/// Overrides config fields from environment variables, read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = non_empty(ENV_API_BASE_URL) {
        config.api_base_url = value;
    }
    if let Some(value) = non_empty(ENV_WS_URL) {
        config.ws_url = value;
    }
    if let Some(value) = non_empty(ENV_AUTH_TOKEN) {
        config.auth_token = Some(value);
    }
    if let Some(value) = non_empty(ENV_LOG) {
        config.log_filter = value;
    }
}
