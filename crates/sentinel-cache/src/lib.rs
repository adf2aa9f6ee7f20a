//! Versioned on-disk finding cache with corruption recovery (§4.G):
//! temp-then-rename atomic writes and schema-version validation before
//! a cache is trusted.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sentinel_types::Cache;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename {path}.tmp to {path}: {source}")]
    Rename {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to write invalid cache structure: {0}")]
    InvalidStructure(String),
    #[error("cache directory is not writable: {0}")]
    DirectoryNotWritable(std::path::PathBuf),
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Appends `.{suffix}` after `path`'s full name (extension included),
/// e.g. `cache.json` + `corrupted.123` -> `cache.json.corrupted.123`.
/// `Path::with_extension` would instead replace `.json`, losing it.
fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Validate the structural invariants a `Cache` must hold before it is
/// persisted: version is 1 or 2, and every entry must carry the fields
/// `CacheEntry` requires (guaranteed by the type system once deserialized,
/// but re-checked here so a hand-constructed `Cache` can't be written with
/// an unsupported version).
fn validate(cache: &Cache) -> Result<(), CacheError> {
    if cache.version != 1 && cache.version != 2 {
        return Err(CacheError::InvalidStructure(format!(
            "unsupported cache version {}",
            cache.version
        )));
    }
    Ok(())
}

/// Load the cache at `path`. Missing or empty/whitespace-only files yield
/// an empty v2 cache. On parse or validation failure, the corrupt file is
/// copied aside to `<path>.corrupted.<timestamp_ms>` (best-effort) and an
/// empty v2 cache is returned. v1 payloads are re-labeled to v2 on load —
/// the on-disk shape is identical, only the version tag changes.
pub fn load(path: &Path) -> Cache {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Cache::empty(),
    };

    if raw.trim().is_empty() {
        return Cache::empty();
    }

    match serde_json::from_str::<Cache>(&raw) {
        Ok(mut cache) if cache.version == 1 || cache.version == 2 => {
            cache.version = 2;
            cache
        }
        _ => {
            let corrupted_path = append_suffix(path, &format!("corrupted.{}", now_ms()));
            let _ = fs::copy(path, &corrupted_path);
            let _ = fs::remove_file(path);
            Cache::empty()
        }
    }
}

/// Persist `cache` to `path` via write-temp-then-rename. Refuses to write
/// a structurally invalid cache or into an unwritable directory.
pub fn save(path: &Path, cache: &Cache) -> Result<(), CacheError> {
    validate(cache)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    if fs::create_dir_all(dir).is_err() && !dir.is_dir() {
        return Err(CacheError::DirectoryNotWritable(dir.to_path_buf()));
    }

    let tmp_path = append_suffix(path, &format!("tmp.{}", now_ms()));
    let data = serde_json::to_vec_pretty(cache).map_err(|e| {
        CacheError::InvalidStructure(format!("failed to serialize cache: {e}"))
    })?;

    fs::write(&tmp_path, &data).map_err(|source| CacheError::Write {
        path: tmp_path.clone(),
        source,
    })?;

    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(source) => {
            let _ = fs::remove_file(&tmp_path);
            Err(CacheError::Rename {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::CacheEntry;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_empty_v2() {
        let dir = tempdir().unwrap();
        let cache = load(&dir.path().join("cache.json"));
        assert_eq!(cache.version, 2);
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn empty_file_yields_empty_v2() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "   \n").unwrap();
        let cache = load(&path);
        assert_eq!(cache.version, 2);
    }

    #[test]
    fn corrupt_json_is_quarantined_and_returns_empty_v2() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not valid json").unwrap();
        let cache = load(&path);
        assert_eq!(cache.version, 2);
        assert!(cache.entries.is_empty());
        assert!(!path.exists());
        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupted"))
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn v1_cache_is_upgraded_to_v2_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut entries = BTreeMap::new();
        entries.insert(
            "src/main.rs".to_string(),
            CacheEntry {
                mtime_ms: 123,
                size: 45,
                findings: vec![],
                hash: None,
            },
        );
        let v1 = Cache { version: 1, entries };
        fs::write(&path, serde_json::to_string(&v1).unwrap()).unwrap();

        let loaded = load(&path);
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.entries.len(), 1);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub/cache.json");
        let cache = Cache::empty();
        save(&path, &cache).unwrap();
        assert!(path.is_file());
        assert!(!path.with_extension("tmp").exists());

        let loaded = load(&path);
        assert_eq!(loaded, cache);
    }

    #[test]
    fn save_refuses_invalid_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = Cache {
            version: 99,
            entries: BTreeMap::new(),
        };
        let result = save(&path, &cache);
        assert!(matches!(result, Err(CacheError::InvalidStructure(_))));
        assert!(!path.exists());
    }

    proptest::proptest! {
        #[test]
        fn save_load_round_trip_preserves_entries(count in 0usize..10) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("cache.json");
            let mut entries = BTreeMap::new();
            for i in 0..count {
                entries.insert(
                    format!("file{i}.txt"),
                    CacheEntry { mtime_ms: i as u128, size: i as u64, findings: vec![], hash: None },
                );
            }
            let cache = Cache { version: 2, entries };
            save(&path, &cache).unwrap();
            let loaded = load(&path);
            prop_assert_eq!(loaded.entries.len(), count);
        }
    }
}
