//! Parameter persistence
//!
//! Parameters live in memory and reach a [`ParamStorage`] only when saved.
//! Saves are staged in a [`ParamBatch`] and committed as one storage write,
//! so a slot swap or a replacement event lands all-or-nothing.

use crate::constants::store;
use crate::error::{CompassError, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key-addressed parameter storage
pub trait ParamStorage: Send {
    /// Persisted value for `key`, if any
    fn read(&self, key: &str) -> Option<Value>;

    /// Persist every entry in one transaction
    fn write_batch(&mut self, entries: &[(String, Value)]) -> Result<()>;
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<String, Value>,
    commits: usize,
    writes: usize,
}

/// Storage kept in memory
///
/// Clones share the same backing map, so a test can hand one clone to a
/// subsystem, inspect it through another, and "reboot" by building a fresh
/// subsystem on a third.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without counting it as a write
    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.inner.lock().values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().values.get(key).cloned()
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Number of committed batches
    pub fn commits(&self) -> usize {
        self.inner.lock().commits
    }

    /// Number of individual values written
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }
}

impl ParamStorage for MemoryStorage {
    fn read(&self, key: &str) -> Option<Value> {
        self.get(key)
    }

    fn write_batch(&mut self, entries: &[(String, Value)]) -> Result<()> {
        let mut inner = self.inner.lock();
        for (key, value) in entries {
            inner.values.insert(key.clone(), value.clone());
        }
        inner.commits += 1;
        inner.writes += entries.len();
        Ok(())
    }
}

// ============================================================================
// JSON file storage
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    params: BTreeMap<String, Value>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: store::CURRENT_VERSION,
            params: BTreeMap::new(),
        }
    }
}

/// Versioned JSON parameter file
///
/// Every committed batch rewrites the file atomically.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    doc: StoreDocument,
}

impl JsonFileStorage {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            debug!("No parameter store at {:?}, starting empty", path);
            return Ok(Self {
                path,
                doc: StoreDocument::default(),
            });
        }

        let content = read_limited(&path, store::MAX_STORE_SIZE)?;
        let mut doc: StoreDocument = serde_json::from_str(&content)?;

        if doc.version > store::CURRENT_VERSION {
            return Err(CompassError::UnsupportedStoreVersion {
                found: doc.version,
                supported: store::CURRENT_VERSION,
            });
        }

        if doc.version < store::CURRENT_VERSION {
            warn!(
                old_version = doc.version,
                new_version = store::CURRENT_VERSION,
                "Parameter store version outdated, migrating"
            );
            doc = Self::migrate(doc);
        }

        info!(
            params = doc.params.len(),
            "Loaded parameter store from {:?}", path
        );

        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.doc.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.params.is_empty()
    }

    fn migrate(mut doc: StoreDocument) -> StoreDocument {
        // Version 0 files carry the same key layout
        doc.version = store::CURRENT_VERSION;
        doc
    }

    fn flush(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.doc)?;
        write_atomic(&self.path, json.as_bytes())
    }
}

impl ParamStorage for JsonFileStorage {
    fn read(&self, key: &str) -> Option<Value> {
        self.doc.params.get(key).cloned()
    }

    fn write_batch(&mut self, entries: &[(String, Value)]) -> Result<()> {
        let previous: Vec<(String, Option<Value>)> = entries
            .iter()
            .map(|(key, _)| (key.clone(), self.doc.params.get(key).cloned()))
            .collect();

        for (key, value) in entries {
            self.doc.params.insert(key.clone(), value.clone());
        }

        if let Err(e) = self.flush() {
            // Roll back so memory never claims values the file does not hold
            for (key, old) in previous {
                match old {
                    Some(value) => self.doc.params.insert(key, value),
                    None => self.doc.params.remove(&key),
                };
            }
            return Err(e);
        }

        debug!(count = entries.len(), "Committed parameter batch");
        Ok(())
    }
}

/// Read a file, refusing anything larger than `max_size`
pub(crate) fn read_limited(path: &Path, max_size: u64) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|e| CompassError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    if metadata.len() > max_size {
        return Err(CompassError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size,
        });
    }

    fs::read_to_string(path).map_err(|e| CompassError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomic write - write to temp file, sync, then rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|e| CompassError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    file.write_all(bytes).map_err(|e| CompassError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    file.sync_all().map_err(|e| CompassError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    fs::rename(&temp_path, path).map_err(|e| CompassError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

// ============================================================================
// Typed parameters
// ============================================================================

/// Staged parameter writes, committed as one storage transaction
#[derive(Debug, Default)]
pub struct ParamBatch {
    entries: Vec<(String, Value)>,
}

impl ParamBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a value; a later stage of the same key replaces the earlier one
    pub fn stage<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Write all staged values. Returns how many were written.
    ///
    /// On failure the batch is left intact so the caller can hand it to
    /// [`Param::resync`] for every parameter it touched.
    pub fn commit(&self, storage: &mut dyn ParamStorage) -> Result<usize> {
        if self.entries.is_empty() {
            return Ok(0);
        }
        storage.write_batch(&self.entries)?;
        Ok(self.entries.len())
    }
}

/// A persisted parameter with an in-memory working value
///
/// `set` changes only the working value. The `save` family stages the
/// working value into a batch and records it as the persisted value. If
/// that batch then fails to commit, [`Param::resync`] puts the persisted
/// value back to what storage actually holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Param<T> {
    key: String,
    value: T,
    stored: T,
    default: T,
}

impl<T> Param<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned,
{
    /// Load from storage, falling back to `default` when absent or malformed
    pub fn load(storage: &dyn ParamStorage, key: impl Into<String>, default: T) -> Self {
        let key = key.into();
        let stored = read_value(storage, &key).unwrap_or_else(|| default.clone());
        Self {
            key,
            value: stored.clone(),
            stored,
            default,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Working value
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Last value this parameter persisted (or loaded)
    pub fn stored(&self) -> &T {
        &self.stored
    }

    /// Read the value straight from storage, bypassing the working copy
    pub fn reload(&self, storage: &dyn ParamStorage) -> Option<T> {
        read_value(storage, &self.key)
    }

    /// Forget a save staged in `failed`, which never reached storage
    ///
    /// The working value is kept, so retrying the save writes it again.
    pub fn resync(&mut self, storage: &dyn ParamStorage, failed: &ParamBatch) {
        if failed.contains(&self.key) {
            self.stored = read_value(storage, &self.key).unwrap_or_else(|| self.default.clone());
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    pub fn save(&mut self, batch: &mut ParamBatch) -> Result<()> {
        batch.stage(&self.key, &self.value)?;
        self.stored = self.value.clone();
        Ok(())
    }

    pub fn set_and_save(&mut self, value: T, batch: &mut ParamBatch) -> Result<()> {
        self.value = value;
        self.save(batch)
    }

    /// Set, persisting only when the persisted value would change
    pub fn set_and_save_if_changed(&mut self, value: T, batch: &mut ParamBatch) -> Result<bool> {
        if value == self.stored {
            self.value = value;
            return Ok(false);
        }
        self.set_and_save(value, batch)?;
        Ok(true)
    }
}

fn read_value<T: DeserializeOwned>(storage: &dyn ParamStorage, key: &str) -> Option<T> {
    let raw = storage.read(key)?;
    match serde_json::from_value(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Ignoring malformed parameter");
            None
        }
    }
}
