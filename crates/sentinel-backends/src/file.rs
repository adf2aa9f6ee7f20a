//! File-backed secret store: a JSON `{key: value}` map at a configured
//! path, rewritten whole-file on every `put`/`delete` via
//! `sentinel_fsupdate::safe_update`, with an append-only NDJSON history
//! alongside it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{retry, BackendError, SecretBackend};
use sentinel_retry::RetryConfig;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntry {
    ts: String,
    key: String,
    prev: Option<String>,
    next: String,
}

/// A JSON-map secret store guarded by a process-local mutex (one backend
/// instance per path is assumed; cross-process safety comes from the
/// write-temp-then-rename pattern, not this lock).
pub struct FileBackend {
    path: PathBuf,
    history_path: PathBuf,
    retry_config: RetryConfig,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history_path = history_path_for(&path);
        FileBackend {
            path,
            history_path,
            retry_config: RetryConfig::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    fn load(&self) -> Result<BTreeMap<String, String>, BackendError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| BackendError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(BackendError::Io(e.to_string())),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackendError::Io(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| BackendError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| BackendError::Io(e.to_string()))
    }

    fn append_history(&self, key: &str, prev: Option<String>, next: &str) -> Result<(), BackendError> {
        if let Some(parent) = self.history_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackendError::Io(e.to_string()))?;
        }
        let entry = HistoryEntry {
            ts: Utc::now().to_rfc3339(),
            key: key.to_string(),
            prev,
            next: next.to_string(),
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .map_err(|e| BackendError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| BackendError::Io(e.to_string()))
    }
}

fn history_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "secrets".to_string());
    name.push_str(".history.ndjson");
    path.with_file_name(name)
}

impl SecretBackend for FileBackend {
    fn provider(&self) -> &'static str {
        "file"
    }

    fn put(&self, key: &str, value: &str) -> Result<String, BackendError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        retry(&self.retry_config, |_attempt| {
            let mut map = self.load()?;
            let prev = map.get(key).cloned();
            let changed = prev.as_deref() != Some(value);
            map.insert(key.to_string(), value.to_string());
            self.write_map(&map)?;
            if changed {
                self.append_history(key, prev, value)?;
            }
            Ok(key.to_string())
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        retry(&self.retry_config, |_attempt| {
            let map = self.load()?;
            Ok(map.get(key).cloned())
        })
    }

    fn delete(&self, key: &str) -> Result<(), BackendError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        retry(&self.retry_config, |_attempt| {
            let mut map = self.load()?;
            if map.remove(key).is_none() {
                return Ok(());
            }
            self.write_map(&map)
        })
    }
}

/// Extract `data.data.value`-shaped nested lookups used by tests and the
/// Vault backend for readable assertions against raw JSON bodies.
#[allow(dead_code)]
pub(crate) fn get_nested<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    Some(current)
}
