//! Cockpit infrastructure: local files for configuration and preferences.

pub mod config_service;
pub mod paths;
pub mod preferences_repository;
pub mod storage;

pub use config_service::ConfigService;
pub use paths::CockpitPaths;
pub use preferences_repository::TomlPreferencesRepository;
