//! Preferences repository trait.

use super::preferences::Preferences;
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for chat preferences.
///
/// Decouples the session engine from the storage mechanism (TOML file,
/// settings endpoint, browser storage bridge).
#[async_trait]
pub trait PreferencesRepository: Send + Sync {
    /// Loads the stored preferences.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Preferences))`: Preferences found
    /// - `Ok(None)`: Nothing stored yet
    /// - `Err(_)`: Error occurred during retrieval
    async fn load(&self) -> Result<Option<Preferences>>;

    /// Replaces the stored preferences.
    async fn save(&self, preferences: &Preferences) -> Result<()>;
}
