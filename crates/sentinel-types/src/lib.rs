//! Shared data model for the sentinel scan/rotate/audit pipeline.
//!
//! These types are intentionally permissive on deserialization (unknown
//! fields tolerated, most fields defaulted) so that findings, policy, and
//! catalog documents remain forward compatible across versions — validation
//! happens at the boundary (config loading, cache loading), not inside the
//! engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Severity bucket assigned to a finding or a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Numeric rank used for threshold comparisons; higher is worse.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
        }
    }

    pub fn parse_lenient(s: &str) -> Option<Severity> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }

    /// Severity derived from an ML hook's confidence score per the
    /// bridge's normalization contract: `>=0.8` high, `>=0.4` medium,
    /// else low.
    pub fn from_confidence(confidence: f64) -> Severity {
        if confidence >= 0.8 {
            Severity::High
        } else if confidence >= 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

/// A span within a line, as reported by the ML hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub length: usize,
}

/// An immutable record produced by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Absolute or tree-relative path; for archive entries,
    /// `"<archive>:<inner_path>"`.
    pub file_path: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based, byte-counted column within the line.
    pub column: usize,
    /// The raw matched substring. Sensitive — never log verbatim.
    pub r#match: String,
    /// A trimmed, at-most-200-char snippet of the line.
    pub context: String,
    /// Rule name, e.g. `"AWS Access Key ID"`, `"High-Entropy Token"`,
    /// `"ML-Hook"`.
    pub rule_name: String,
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Finding {
    /// Sort key for deterministic comparisons across concurrency levels:
    /// file, line, column, match, rule.
    pub fn sort_key(&self) -> (&str, usize, usize, &str, &str) {
        (
            self.file_path.as_str(),
            self.line,
            self.column,
            self.r#match.as_str(),
            self.rule_name.as_str(),
        )
    }
}

/// A compiled or pending credential-matching rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Why a detector skipped some or all of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    FileTooLarge,
    LineTooLong,
    TotalBytesExceeded,
    Truncated,
    Unreadable,
    ArchiveEntryTooLarge,
    ArchiveLimitExceeded,
    NonTextBinary,
}

/// Result of scanning a single file (or archive entry).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_reasons: Vec<SkipReason>,
}

/// A single file's cached scan outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub mtime_ms: u128,
    pub size: u64,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// On-disk cache shape. Version 1 is mtime/size only; version 2 adds the
/// optional content hash. Version 1 is transparently upgraded to 2 on
/// load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Cache {
    pub const CURRENT_VERSION: u32 = 2;

    pub fn empty() -> Self {
        Cache {
            version: Self::CURRENT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// An arbitrary ordered map of audit fields; the audit writer adds
/// `hash`/`sig`/`keyId` on write.
pub type AuditEvent = serde_json::Map<String, serde_json::Value>;

/// Threshold/forbid-rule/min-severity configuration for the policy gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<PolicyThresholds>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbid_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<Severity>,
}

/// Logical secret key/value pair handed to a [backend][crate::BackendSecret]
/// `put`. `key` is sanitized to `[A-Za-z0-9_.-]` by the caller before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSecret {
    pub key: String,
    pub value: String,
}

/// Build the canonical `secretref://<provider>/<suffix>` placeholder.
pub fn secret_ref(provider: &str, suffix: &str) -> String {
    format!("secretref://{provider}/{suffix}")
}

/// Sanitize a string down to the charset allowed in a backend key:
/// `[A-Za-z0-9_.-]`, replacing everything else with `_`.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
