//! Atomic file updater (§4.H): `safe_update(path, transform)` writes a
//! backup, writes the transformed content to a temp file, and renames it
//! into place, rolling back to the backup on any failure after the backup
//! was written.
//!
//! Invariant: at every observable point, `path` contains either the full
//! original or the full updated content; never a partial write.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("path traverses outside the tree or contains a null byte: {0}")]
    UnsafePath(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rollback of {path} from backup {backup} failed: {source}")]
    RollbackFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub backup_path: PathBuf,
}

/// Reject paths containing `..` components or a null byte.
fn validate_path(path: &Path) -> Result<(), UpdateError> {
    let as_str = path.to_string_lossy();
    if as_str.contains('\0') {
        return Err(UpdateError::UnsafePath(as_str.into_owned()));
    }
    if path.components().any(|c| c == std::path::Component::ParentDir) {
        return Err(UpdateError::UnsafePath(as_str.into_owned()));
    }
    Ok(())
}

/// Replace path separators and other non-portable characters in `path`
/// with `_` so it can be used as a flat filename under the temp dir.
fn sanitize_rel(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect()
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Resolve the default temp directory (`.sentinel_tmp` under `cwd`),
/// creating it if needed.
pub fn default_tmp_dir(cwd: &Path) -> std::io::Result<PathBuf> {
    let dir = cwd.join(".sentinel_tmp");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// Copy-then-unlink fallback for renames that fail across devices.
fn rename_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

/// Write `transform(original_content)` into `path`, backing up the
/// original under `tmp_dir` first and rolling back on any failure.
pub fn safe_update(
    path: &Path,
    tmp_dir: &Path,
    transform: impl FnOnce(&str) -> String,
) -> Result<UpdateOutcome, UpdateError> {
    validate_path(path)?;

    let original = fs::read_to_string(path).map_err(|source| UpdateError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let sanitized = sanitize_rel(path);
    let ts = now_ms();
    let backup_path = tmp_dir.join(format!("{sanitized}.bak.{ts}"));
    let tmp_path = tmp_dir.join(format!("{sanitized}.tmp.{ts}"));

    fs::write(&backup_path, &original).map_err(|source| UpdateError::Write {
        path: backup_path.clone(),
        source,
    })?;

    let updated = transform(&original);

    let write_result = fs::write(&tmp_path, &updated).map_err(|source| UpdateError::Write {
        path: tmp_path.clone(),
        source,
    });

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    match rename_or_copy(&tmp_path, path) {
        Ok(()) => {
            fsync_parent_dir(path);
            let _ = fs::remove_file(&tmp_path);
            Ok(UpdateOutcome { backup_path })
        }
        Err(rename_err) => {
            let _ = fs::remove_file(&tmp_path);
            if let Err(rollback_err) = fs::copy(&backup_path, path) {
                return Err(UpdateError::RollbackFailed {
                    path: path.to_path_buf(),
                    backup: backup_path,
                    source: rollback_err,
                });
            }
            Err(UpdateError::Rename {
                from: tmp_path,
                to: path.to_path_buf(),
                source: rename_err,
            })
        }
    }
}

/// Restore the most recent backup (highest `<ts>` suffix) recorded for
/// `path` in `tmp_dir`, overwriting `path` with its contents.
pub fn undo(path: &Path, tmp_dir: &Path) -> Result<PathBuf, UpdateError> {
    let sanitized = sanitize_rel(path);
    let prefix = format!("{sanitized}.bak.");

    let mut best: Option<(u128, PathBuf)> = None;
    if let Ok(entries) = fs::read_dir(tmp_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(ts_str) = name.strip_prefix(&prefix) {
                if let Ok(ts) = ts_str.parse::<u128>() {
                    if best.as_ref().is_none_or(|(best_ts, _)| ts > *best_ts) {
                        best = Some((ts, entry.path()));
                    }
                }
            }
        }
    }

    let (_, backup_path) = best.ok_or_else(|| UpdateError::UnsafePath(format!(
        "no backup found for {}",
        path.display()
    )))?;

    fs::copy(&backup_path, path).map_err(|source| UpdateError::RollbackFailed {
        path: path.to_path_buf(),
        backup: backup_path.clone(),
        source,
    })?;

    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn safe_update_writes_transformed_content_and_keeps_backup() {
        let dir = tempdir().unwrap();
        let tmp_dir = dir.path().join("tmp");
        fs::create_dir_all(&tmp_dir).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "before AKIA123 after\n").unwrap();

        let outcome = safe_update(&file, &tmp_dir, |s| s.replace("AKIA123", "REDACTED")).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "before REDACTED after\n");
        assert_eq!(
            fs::read_to_string(&outcome.backup_path).unwrap(),
            "before AKIA123 after\n"
        );
    }

    #[test]
    fn rejects_paths_with_parent_dir_components() {
        let dir = tempdir().unwrap();
        let tmp_dir = dir.path().join("tmp");
        fs::create_dir_all(&tmp_dir).unwrap();
        let result = safe_update(Path::new("../escape.txt"), &tmp_dir, |s| s.to_string());
        assert!(matches!(result, Err(UpdateError::UnsafePath(_))));
    }

    #[test]
    fn rejects_null_byte_paths() {
        let dir = tempdir().unwrap();
        let tmp_dir = dir.path().join("tmp");
        fs::create_dir_all(&tmp_dir).unwrap();
        let bad = format!("{}\0", dir.path().join("x.txt").display());
        let result = validate_path(Path::new(&bad));
        assert!(result.is_err());
    }

    #[test]
    fn undo_restores_most_recent_backup() {
        let dir = tempdir().unwrap();
        let tmp_dir = dir.path().join("tmp");
        fs::create_dir_all(&tmp_dir).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "v1\n").unwrap();

        safe_update(&file, &tmp_dir, |_| "v2\n".to_string()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        safe_update(&file, &tmp_dir, |_| "v3\n".to_string()).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "v3\n");
        undo(&file, &tmp_dir).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "v2\n");
    }

    #[test]
    fn never_leaves_partial_write_on_transform() {
        let dir = tempdir().unwrap();
        let tmp_dir = dir.path().join("tmp");
        fs::create_dir_all(&tmp_dir).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "original\n").unwrap();

        let outcome = safe_update(&file, &tmp_dir, |s| format!("{s}appended\n")).unwrap();
        let content = fs::read_to_string(&file).unwrap();
        assert!(content == "original\nappended\n");
        assert!(outcome.backup_path.exists());
    }
}
