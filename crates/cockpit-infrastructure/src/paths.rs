//! Path management for Cockpit's local files.
//!
//! ```text
//! ~/.config/cockpit/
//! ├── config.toml          # EngineConfig
//! └── preferences.toml     # Preferences
//! ```

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Cannot determine the user's config directory")]
    ConfigDirNotFound,
}

/// Resolves Cockpit's file locations, optionally under an explicit root.
#[derive(Debug, Clone, Default)]
pub struct CockpitPaths {
    root: Option<PathBuf>,
}

impl CockpitPaths {
    /// Creates a resolver. `None` uses the platform config directory.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn config_dir(&self) -> Result<PathBuf, PathError> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join("cockpit"))
                .ok_or(PathError::ConfigDirNotFound),
        }
    }

    pub fn config_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    pub fn preferences_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("preferences.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_is_used_verbatim() {
        let paths = CockpitPaths::new(Some(PathBuf::from("/tmp/cockpit-test")));
        assert_eq!(
            paths.preferences_file().unwrap(),
            PathBuf::from("/tmp/cockpit-test/preferences.toml")
        );
        assert_eq!(
            paths.config_file().unwrap(),
            PathBuf::from("/tmp/cockpit-test/config.toml")
        );
    }
}
