//! Key/value preference storage backing the profile store
//!
//! Values are either plain strings or string sets. Edits are buffered and
//! written out by [`Preferences::commit`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// A stored preference value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Text(String),
    Set(BTreeSet<String>),
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("Preferences I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Preferences file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Preference store capability
pub trait Preferences: Send {
    fn get(&self, key: &str) -> Option<&PrefValue>;

    /// Every key, in store order
    fn keys(&self) -> Vec<String>;

    fn put(&mut self, key: &str, value: PrefValue);

    fn remove(&mut self, key: &str);

    fn clear(&mut self);

    /// Make buffered edits durable
    fn commit(&mut self) -> Result<(), PreferencesError>;

    fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(PrefValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    fn get_string_set(&self, key: &str) -> Option<&BTreeSet<String>> {
        match self.get(key) {
            Some(PrefValue::Set(values)) => Some(values),
            _ => None,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-memory preferences
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, PrefValue>,
    commits: usize,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<&PrefValue> {
        self.values.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn put(&mut self, key: &str, value: PrefValue) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    fn commit(&mut self) -> Result<(), PreferencesError> {
        self.commits += 1;
        Ok(())
    }
}

/// Preferences kept in a JSON file
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: BTreeMap<String, PrefValue>,
}

impl FilePreferences {
    /// Open `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferencesError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = values.len(), "Opened preferences");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Preferences for FilePreferences {
    fn get(&self, key: &str) -> Option<&PrefValue> {
        self.values.get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn put(&mut self, key: &str, value: PrefValue) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    /// Write to a sibling temp file, then rename over the target
    fn commit(&mut self) -> Result<(), PreferencesError> {
        let json = serde_json::to_string_pretty(&self.values)?;
        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), entries = self.values.len(), "Preferences committed");
        Ok(())
    }
}
