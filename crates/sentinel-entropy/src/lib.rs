//! High-Shannon-entropy base64/hex token detection (§4.B).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static BASE64_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/=]{16,}").unwrap());
static HEX_LIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Fa-f0-9]{16,}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyConfig {
    pub min_length: usize,
    pub threshold: f64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        EntropyConfig {
            min_length: 32,
            threshold: 3.5,
        }
    }
}

/// A high-entropy candidate found on a line.
#[derive(Debug, Clone, PartialEq)]
pub struct EntropyCandidate {
    /// 0-based byte offset within the line.
    pub start: usize,
    pub token: String,
    pub entropy: f64,
}

/// Shannon entropy of `s`, in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn is_all_same_char(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => true,
    }
}

/// Scan a single line for high-entropy base64-like and hex-like tokens
/// meeting `config.min_length` and `config.threshold`.
pub fn scan_line(line: &str, config: &EntropyConfig) -> Vec<EntropyCandidate> {
    let mut seen_spans: Vec<(usize, usize)> = Vec::new();
    let mut out = Vec::new();

    for regex in [&*BASE64_LIKE, &*HEX_LIKE] {
        for m in regex.find_iter(line) {
            let token = m.as_str();
            if token.len() < config.min_length || is_all_same_char(token) {
                continue;
            }
            let span = (m.start(), m.end());
            if seen_spans.iter().any(|&(s, e)| s == span.0 && e == span.1) {
                continue;
            }
            let entropy = shannon_entropy(token);
            if entropy >= config.threshold {
                seen_spans.push(span);
                out.push(EntropyCandidate {
                    start: m.start(),
                    token: token.to_string(),
                    entropy,
                });
            }
        }
    }

    out.sort_by_key(|c| c.start);
    out
}
