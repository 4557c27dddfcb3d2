//! File-backed storage primitives.

pub mod atomic_toml;

pub use atomic_toml::{StorageError, TomlDocument};
