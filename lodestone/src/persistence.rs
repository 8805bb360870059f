//! Per-world key/value persistence.
//!
//! The core stores only two values: the ordered list of determined source
//! cells and the regen period boundary. Stores deal in `serde_json::Value`
//! so implementations stay format-agnostic; [`load`] and [`save`] wrap the
//! typed conversion and turn every failure into a warning.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Key of the ordered determined-source-cell list.
pub const KEY_SOURCE_CELLS: &str = "determined_source_cells";

/// Key of the regen period boundary.
pub const KEY_REGEN_PERIOD: &str = "regen_period";

/// Persistence failures. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Persistence I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Persistence JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence document at {0} is not a JSON object")]
    NotAnObject(PathBuf),
}

/// Get/set store scoped to one world instance.
pub trait PersistenceStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError>;

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError>;
}

/// Reads and decodes `key`, treating any failure as "no prior state".
pub fn load<T: DeserializeOwned>(store: &dyn PersistenceStore, key: &str) -> Option<T> {
    let value = match store.get(key) {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!(key, "No persisted value");
            return None;
        }
        Err(e) => {
            warn!(key, error = %e, "Failed to read persisted state, starting cold");
            return None;
        }
    };

    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key, error = %e, "Persisted state is malformed, starting cold");
            None
        }
    }
}

/// Encodes and writes `value`. Returns false (after logging) on failure.
pub fn save<T: Serialize + ?Sized>(store: &dyn PersistenceStore, key: &str, value: &T) -> bool {
    let result = serde_json::to_value(value)
        .map_err(PersistenceError::from)
        .and_then(|encoded| store.set(key, encoded));
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(key, error = %e, "Failed to write persisted state");
            false
        }
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON object per world, rewritten whole on every `set`.
///
/// Writes go to a sibling `.tmp` file that is then renamed over the
/// document, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    document: Mutex<serde_json::Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens the document at `path`. A missing file is an empty document.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let document = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => map,
                _ => return Err(PersistenceError::NotAnObject(path)),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => serde_json::Map::new(),
            Err(e) => return Err(PersistenceError::Io(e)),
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(
        &self,
        document: &serde_json::Map<String, Value>,
    ) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, bytes)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl PersistenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.document.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        let mut document = self.document.lock();
        document.insert(key.to_string(), value);
        self.write_atomically(&document)
    }
}
