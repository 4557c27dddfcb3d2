//! Atomic TOML documents.
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so readers only ever observe a complete document. Read-modify-write
//! cycles hold an exclusive `fs2` lock on a sibling `.lock` file.

use cockpit_core::CockpitError;
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to lock {path}: {message}")]
    Lock { path: PathBuf, message: String },

    #[error("Invalid document path: {0}")]
    InvalidPath(PathBuf),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<StorageError> for CockpitError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::Parse { .. } | StorageError::Serialize(_) => CockpitError::Serialization {
                format: "TOML".to_string(),
                message,
            },
            _ => CockpitError::Io { message },
        }
    }
}

/// A TOML file holding one serialized `T`.
#[derive(Debug, Clone)]
pub struct TomlDocument<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TomlDocument<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(T))`: the parsed document
    /// - `Ok(None)`: the file is missing or blank
    /// - `Err`: the file could not be read or parsed
    pub fn load(&self) -> Result<Option<T>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        toml::from_str(&content)
            .map(Some)
            .map_err(|source| StorageError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Replaces the document atomically.
    pub fn save(&self, value: &T) -> Result<(), StorageError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;

        let rendered = toml::to_string_pretty(value)?;
        let tmp_path = self.temp_path()?;

        let mut tmp = File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
        tmp.write_all(rendered.as_bytes())
            .and_then(|_| tmp.sync_all())
            .map_err(|e| StorageError::io(&tmp_path, e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::io(&self.path, e))
    }

    /// Loads (or defaults), applies `f`, and saves, all under an exclusive lock.
    ///
    /// # Returns
    ///
    /// The value as written.
    pub fn update<F>(&self, default_value: T, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut T),
        T: Clone,
    {
        let _lock = DocumentLock::acquire(&self.path)?;
        let mut value = self.load()?.unwrap_or(default_value);
        f(&mut value);
        self.save(&value)?;
        Ok(value)
    }

    fn temp_path(&self) -> Result<PathBuf, StorageError> {
        let name = self
            .path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(self.path.clone()))?;
        Ok(self
            .path
            .with_file_name(format!(".{}.tmp", name.to_string_lossy())))
    }
}

/// Exclusive lock released on drop.
struct DocumentLock {
    _file: File,
    lock_path: PathBuf,
}

impl DocumentLock {
    fn acquire(path: &Path) -> Result<Self, StorageError> {
        let lock_path = path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StorageError::io(&lock_path, e))?;

        fs2::FileExt::lock_exclusive(&file).map_err(|e| StorageError::Lock {
            path: lock_path.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            _file: file,
            lock_path,
        })
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
