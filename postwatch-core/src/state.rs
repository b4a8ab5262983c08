use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// A monitored page or profile. Compared by exact string identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Last reported item id per target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermarks(BTreeMap<String, String>);

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &Target) -> Option<&str> {
        self.0.get(target.as_str()).map(String::as_str)
    }

    /// Returns true when the stored value changed.
    pub fn set(&mut self, target: &Target, id: impl Into<String>) -> bool {
        let id = id.into();
        match self.0.get(target.as_str()) {
            Some(current) if *current == id => false,
            _ => {
                self.0.insert(target.as_str().to_string(), id);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Watermarks {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error on {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StateResult<T> = Result<T, StateError>;

/// Durable watermark storage.
pub trait WatermarkStore: Send + Sync {
    fn try_load(&self) -> StateResult<Watermarks>;

    fn save(&self, watermarks: &Watermarks) -> StateResult<()>;

    /// Never fails: unreadable state means starting fresh.
    fn load(&self) -> Watermarks {
        match self.try_load() {
            Ok(watermarks) => watermarks,
            Err(err) => {
                warn!(error = %err, "could not load watermarks, starting fresh");
                Watermarks::default()
            }
        }
    }
}

/// Pretty-printed JSON object on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StateError {
        StateError::Io {
            source,
            path: self.path.clone(),
        }
    }
}

impl WatermarkStore for JsonFileStore {
    fn try_load(&self) -> StateResult<Watermarks> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no watermark file yet");
                return Ok(Watermarks::default());
            }
            Err(err) => return Err(self.io_error(err)),
        };
        if content.trim().is_empty() {
            return Ok(Watermarks::default());
        }
        serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
            source,
            path: self.path.clone(),
        })
    }

    fn save(&self, watermarks: &Watermarks) -> StateResult<()> {
        let encoded = serde_json::to_vec_pretty(watermarks)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|err| self.io_error(err))?;

        let mut file = NamedTempFile::new_in(&dir).map_err(|err| self.io_error(err))?;
        file.write_all(&encoded).map_err(|err| self.io_error(err))?;
        file.write_all(b"\n").map_err(|err| self.io_error(err))?;
        file.as_file().sync_all().map_err(|err| self.io_error(err))?;
        file.persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;
        debug!(path = %self.path.display(), entries = watermarks.len(), "watermarks saved");
        Ok(())
    }
}

/// In-process store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Watermarks>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermarks(watermarks: Watermarks) -> Self {
        Self {
            inner: Mutex::new(watermarks),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> Watermarks {
        self.inner.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl WatermarkStore for MemoryStore {
    fn try_load(&self) -> StateResult<Watermarks> {
        Ok(self.inner.lock().unwrap().clone())
    }

    fn save(&self, watermarks: &Watermarks) -> StateResult<()> {
        *self.inner.lock().unwrap() = watermarks.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

/// In-memory watermarks backed by a store; every change is written through.
pub struct WatermarkLedger {
    store: Arc<dyn WatermarkStore>,
    current: Watermarks,
}

impl fmt::Debug for WatermarkLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkLedger")
            .field("current", &self.current)
            .finish()
    }
}

impl WatermarkLedger {
    pub fn load(store: Arc<dyn WatermarkStore>) -> Self {
        let current = store.load();
        Self { store, current }
    }

    pub fn get(&self, target: &Target) -> Option<&str> {
        self.current.get(target)
    }

    /// Moves the watermark and saves immediately. The in-memory value moves
    /// even when the save fails, so the running worker does not re-report.
    pub fn advance(&mut self, target: &Target, id: &str) -> StateResult<bool> {
        if !self.current.set(target, id) {
            return Ok(false);
        }
        self.store.save(&self.current)?;
        Ok(true)
    }

    pub fn flush(&self) -> StateResult<()> {
        self.store.save(&self.current)
    }

    pub fn snapshot(&self) -> Watermarks {
        self.current.clone()
    }
}
