//! Tamper-evident audit log (§4.L): an append-only NDJSON writer that
//! chains each event to a SHA-256 hash and, optionally, an HMAC-SHA256
//! signature, plus a verifier that re-derives both over a written log.
//!
//! Append pattern: create parents, open in append mode, one
//! `serde_json::to_string` + newline per record. `sentinel_types::AuditEvent`
//! is a plain `serde_json::Map`, which (without the `preserve_order`
//! feature) is backed by a `BTreeMap` — so `serde_json::to_string` on it,
//! and on any nested object value, already emits recursively key-sorted
//! JSON. That makes the "canonical form" step free: there is no separate
//! canonicalizer to write or to get wrong.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sentinel_types::AuditEvent;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Appends hash-chained (and optionally signed) events to an NDJSON file.
pub struct AuditWriter {
    path: PathBuf,
    signing_key: Option<Vec<u8>>,
    key_id: Option<String>,
}

impl AuditWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditWriter { path: path.into(), signing_key: None, key_id: None }
    }

    pub fn with_signing_key(mut self, key: impl AsRef<[u8]>, key_id: Option<String>) -> Self {
        self.signing_key = Some(key.as_ref().to_vec());
        self.key_id = key_id;
        self
    }

    /// Computes `hash` (and `sig`/`keyId` if a signing key is set) over
    /// `event`, then appends the resulting line to the log file.
    pub fn write_event(&self, mut event: AuditEvent) -> Result<(), AuditError> {
        let canonical = serde_json::to_string(&event)?;
        let hash_hex = sha256_hex(canonical.as_bytes());
        event.insert("hash".to_string(), Value::String(format!("sha256-{hash_hex}")));

        if let Some(key) = &self.signing_key {
            let sig_hex = hmac_hex(key, hash_hex.as_bytes());
            event.insert("sig".to_string(), Value::String(format!("hmac-sha256-{sig_hex}")));
            if let Some(key_id) = &self.key_id {
                event.insert("keyId".to_string(), Value::String(key_id.clone()));
            }
        }

        let line = serde_json::to_string(&event)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line_number: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineWarning {
    pub line_number: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// HMAC key to check `sig` fields against. Signatures are only
    /// checked when both this and the event's `sig` field are present;
    /// a log with no key configured is hash-checked but not signature-checked.
    pub signing_key: Option<Vec<u8>>,
    pub allow_duplicate_hashes: bool,
    pub check_timestamps: bool,
    /// Field name holding an RFC 3339 timestamp, checked for monotonicity
    /// when `check_timestamps` is set.
    pub timestamp_field: String,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            signing_key: None,
            allow_duplicate_hashes: false,
            check_timestamps: false,
            timestamp_field: "timestamp".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub event_count: usize,
    pub errors: Vec<LineError>,
    pub warnings: Vec<LineWarning>,
}

impl VerifyReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Re-derives the hash (and signature, if configured) of every line in
/// `path`, flagging malformed JSON, hash mismatches, signature
/// mismatches, duplicate hashes, and (optionally) out-of-order timestamps.
pub fn verify_file(path: &Path, options: &VerifyOptions) -> Result<VerifyReport, AuditError> {
    if !path.exists() {
        return Ok(VerifyReport { event_count: 0, errors: Vec::new(), warnings: Vec::new() });
    }

    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut seen_hashes: HashSet<String> = HashSet::new();
    let mut last_timestamp: Option<DateTime<Utc>> = None;
    let mut event_count = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        event_count += 1;

        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                errors.push(LineError { line_number, message: format!("invalid JSON: {err}") });
                continue;
            }
        };

        let mut obj = match value {
            Value::Object(map) => map,
            _ => {
                errors.push(LineError { line_number, message: "event is not a JSON object".into() });
                continue;
            }
        };

        let stored_hash = match obj.get("hash").and_then(Value::as_str) {
            Some(h) => h.to_string(),
            None => {
                errors.push(LineError { line_number, message: "missing hash field".into() });
                continue;
            }
        };
        let stored_hash_hex = stored_hash.strip_prefix("sha256-").unwrap_or(&stored_hash).to_string();

        let stored_sig = obj.remove("sig");
        obj.remove("keyId");
        obj.remove("hash");

        let recomputed = match serde_json::to_string(&obj) {
            Ok(s) => sha256_hex(s.as_bytes()),
            Err(err) => {
                errors.push(LineError { line_number, message: format!("could not re-serialize event: {err}") });
                continue;
            }
        };

        if recomputed != stored_hash_hex {
            errors.push(LineError {
                line_number,
                message: format!("hash mismatch: stored {stored_hash_hex}, recomputed {recomputed}"),
            });
        }

        if let Some(sig_value) = stored_sig.as_ref().and_then(Value::as_str) {
            if let Some(key) = &options.signing_key {
                let expected = format!("hmac-sha256-{}", hmac_hex(key, stored_hash_hex.as_bytes()));
                if expected != sig_value {
                    errors.push(LineError { line_number, message: "signature mismatch".into() });
                }
            }
        }

        if !options.allow_duplicate_hashes && !seen_hashes.insert(stored_hash.clone()) {
            errors.push(LineError { line_number, message: format!("duplicate hash {stored_hash}") });
        }

        if options.check_timestamps {
            match obj.get(&options.timestamp_field).and_then(Value::as_str) {
                Some(ts_str) => match DateTime::parse_from_rfc3339(ts_str) {
                    Ok(ts) => {
                        let ts = ts.with_timezone(&Utc);
                        if let Some(last) = last_timestamp {
                            if ts < last {
                                warnings.push(LineWarning {
                                    line_number,
                                    message: format!("timestamp {ts} is earlier than previous event {last}"),
                                });
                            }
                        }
                        last_timestamp = Some(ts);
                    }
                    Err(err) => warnings.push(LineWarning {
                        line_number,
                        message: format!("unparseable timestamp {ts_str:?}: {err}"),
                    }),
                },
                None => warnings.push(LineWarning {
                    line_number,
                    message: format!("missing {:?} field", options.timestamp_field),
                }),
            }
        }
    }

    Ok(VerifyReport { event_count, errors, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(fields: &[(&str, Value)]) -> AuditEvent {
        let mut map = AuditEvent::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.clone());
        }
        map
    }

    #[test]
    fn write_then_verify_unsigned_log_passes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&path);

        writer.write_event(event(&[("action", json!("rotate")), ("file", json!("a.env"))])).unwrap();
        writer.write_event(event(&[("action", json!("rotate")), ("file", json!("b.env"))])).unwrap();

        let report = verify_file(&path, &VerifyOptions::default()).unwrap();
        assert!(report.valid());
        assert_eq!(report.event_count, 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("audit.ndjson");
        let writer = AuditWriter::new(&path);
        writer.write_event(event(&[("action", json!("rotate"))])).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn signed_log_verifies_with_correct_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&path).with_signing_key(b"top-secret", Some("k1".into()));
        writer.write_event(event(&[("action", json!("rotate"))])).unwrap();

        let options = VerifyOptions { signing_key: Some(b"top-secret".to_vec()), ..VerifyOptions::default() };
        let report = verify_file(&path, &options).unwrap();
        assert!(report.valid());
    }

    #[test]
    fn signed_log_fails_with_wrong_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&path).with_signing_key(b"right-key", None);
        writer.write_event(event(&[("action", json!("rotate"))])).unwrap();

        let options = VerifyOptions { signing_key: Some(b"wrong-key".to_vec()), ..VerifyOptions::default() };
        let report = verify_file(&path, &options).unwrap();
        assert!(!report.valid());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("signature mismatch"));
    }

    #[test]
    fn tampered_field_breaks_the_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&path);
        writer.write_event(event(&[("action", json!("rotate")), ("file", json!("a.env"))])).unwrap();

        let original = fs::read_to_string(&path).unwrap();
        let mut tampered: Value = serde_json::from_str(original.trim()).unwrap();
        tampered["file"] = json!("b.env");
        fs::write(&path, format!("{}\n", serde_json::to_string(&tampered).unwrap())).unwrap();

        let report = verify_file(&path, &VerifyOptions::default()).unwrap();
        assert!(!report.valid());
        assert!(report.errors[0].message.contains("hash mismatch"));
    }

    #[test]
    fn duplicate_hash_is_flagged_unless_allowed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&path);
        let record = event(&[("action", json!("rotate"))]);
        writer.write_event(record.clone()).unwrap();
        writer.write_event(record).unwrap();

        let report = verify_file(&path, &VerifyOptions::default()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("duplicate hash"));

        let lenient = VerifyOptions { allow_duplicate_hashes: true, ..VerifyOptions::default() };
        let report = verify_file(&path, &lenient).unwrap();
        assert!(report.valid());
    }

    #[test]
    fn out_of_order_timestamps_warn_but_do_not_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&path);
        writer
            .write_event(event(&[("timestamp", json!("2024-01-02T00:00:00Z"))]))
            .unwrap();
        writer
            .write_event(event(&[("timestamp", json!("2024-01-01T00:00:00Z"))]))
            .unwrap();

        let options = VerifyOptions { check_timestamps: true, ..VerifyOptions::default() };
        let report = verify_file(&path, &options).unwrap();
        assert!(report.valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn missing_log_file_verifies_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.ndjson");
        let report = verify_file(&path, &VerifyOptions::default()).unwrap();
        assert!(report.valid());
        assert_eq!(report.event_count, 0);
    }

    #[test]
    fn malformed_json_line_is_reported_and_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        fs::write(&path, "{not json}\n").unwrap();
        let report = verify_file(&path, &VerifyOptions::default()).unwrap();
        assert!(!report.valid());
        assert!(report.errors[0].message.contains("invalid JSON"));
    }
}
