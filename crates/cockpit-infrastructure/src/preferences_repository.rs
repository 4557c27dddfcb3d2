//! TOML-backed implementation of [`PreferencesRepository`].

use crate::paths::CockpitPaths;
use crate::storage::TomlDocument;
use async_trait::async_trait;
use cockpit_core::session::{Preferences, PreferencesRepository};
use cockpit_core::{CockpitError, Result};
use std::path::PathBuf;

/// Stores preferences in `preferences.toml`.
///
/// File I/O runs on the blocking pool so a slow disk never stalls the
/// session's event loop.
#[derive(Debug, Clone)]
pub struct TomlPreferencesRepository {
    document: TomlDocument<Preferences>,
}

impl TomlPreferencesRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            document: TomlDocument::new(path),
        }
    }

    /// Repository at the default location (`~/.config/cockpit/preferences.toml`).
    pub fn default_location(paths: &CockpitPaths) -> Result<Self> {
        let path = paths
            .preferences_file()
            .map_err(|e| CockpitError::config(e.to_string()))?;
        Ok(Self::new(path))
    }
}

#[async_trait]
impl PreferencesRepository for TomlPreferencesRepository {
    async fn load(&self) -> Result<Option<Preferences>> {
        let document = self.document.clone();
        let loaded = tokio::task::spawn_blocking(move || document.load())
            .await
            .map_err(|e| CockpitError::internal(format!("Preferences load task failed: {e}")))??;
        tracing::debug!(
            "[PreferencesRepository] Loaded preferences from {}: {}",
            self.document.path().display(),
            if loaded.is_some() { "found" } else { "none" }
        );
        Ok(loaded)
    }

    async fn save(&self, preferences: &Preferences) -> Result<()> {
        let document = self.document.clone();
        let next = preferences.clone();
        tokio::task::spawn_blocking(move || document.update(next.clone(), |current| *current = next))
            .await
            .map_err(|e| CockpitError::internal(format!("Preferences save task failed: {e}")))??;
        tracing::debug!("[PreferencesRepository] Saved preferences");
        Ok(())
    }
}
