//! Bridges to an out-of-process ML analyzer over a line-delimited JSON
//! protocol (§4.C, §9 design note: "replace dynamic module loading with a
//! process/plugin boundary... a subprocess with a line-delimited JSON
//! protocol"). A hook timeout or error never fails the enclosing file
//! scan: it is swallowed and counted.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime};

use sentinel_types::{Severity, Span};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    Line,
    File,
    Both,
}

impl HookMode {
    pub fn wants_line(self) -> bool {
        matches!(self, HookMode::Line | HookMode::Both)
    }

    pub fn wants_file(self) -> bool {
        matches!(self, HookMode::File | HookMode::Both)
    }
}

/// A single token reported by the ML hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MlToken {
    /// Normalized 1-based column, and severity, per the bridge's
    /// normalization contract.
    pub fn normalized_column(&self) -> usize {
        match &self.span {
            Some(span) => span.start + 1,
            None => self.index.unwrap_or(0) + 1,
        }
    }

    pub fn normalized_severity(&self) -> Severity {
        match (self.severity, self.confidence) {
            (Some(s), _) => s,
            (None, Some(c)) => Severity::from_confidence(c),
            (None, None) => Severity::Low,
        }
    }
}

#[derive(Serialize)]
struct LineRequest<'a> {
    line: &'a str,
    file_path: &'a str,
    line_number: usize,
}

#[derive(Serialize)]
struct FileRequest<'a> {
    lines: &'a [String],
    file_path: &'a str,
}

#[derive(Deserialize, Default)]
struct HookResponse {
    #[serde(default)]
    tokens: Vec<MlToken>,
}

/// Bridge counters, incremented regardless of success/failure/timeout.
#[derive(Default)]
pub struct HookCounters {
    pub invocations: AtomicU64,
    pub errors: AtomicU64,
    pub time_ms_total: AtomicU64,
}

impl HookCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.invocations.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.time_ms_total.load(Ordering::Relaxed),
        )
    }
}

/// A running (or not-yet-started) hook subprocess, reloaded automatically
/// when `module_path`'s mtime changes.
pub struct MlHookBridge {
    module_path: PathBuf,
    mode: HookMode,
    time_budget: Option<Duration>,
    child: Option<RunningChild>,
    counters: HookCounters,
}

struct RunningChild {
    process: Child,
    mtime: SystemTime,
    stdout: Option<BufReader<std::process::ChildStdout>>,
}

impl MlHookBridge {
    pub fn new(module_path: impl Into<PathBuf>, mode: HookMode, time_budget: Option<Duration>) -> Self {
        MlHookBridge {
            module_path: module_path.into(),
            mode,
            time_budget,
            child: None,
            counters: HookCounters::default(),
        }
    }

    pub fn mode(&self) -> HookMode {
        self.mode
    }

    pub fn counters(&self) -> &HookCounters {
        &self.counters
    }

    fn current_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.module_path).and_then(|m| m.modified()).ok()
    }

    /// Ensure a live subprocess exists, spawning/respawning if the module
    /// file's mtime has changed since we last started it.
    fn ensure_child(&mut self) -> anyhow::Result<()> {
        let current_mtime = self.current_mtime();

        let needs_spawn = match (&self.child, current_mtime) {
            (None, _) => true,
            (Some(running), Some(mtime)) => running.mtime != mtime,
            (Some(_), None) => false,
        };

        if needs_spawn {
            let mut process = Command::new(&self.module_path)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()?;
            let stdout = process
                .stdout
                .take()
                .ok_or_else(|| anyhow::anyhow!("hook subprocess has no stdout pipe"))?;
            self.child = Some(RunningChild {
                process,
                mtime: current_mtime.unwrap_or(SystemTime::UNIX_EPOCH),
                stdout: Some(BufReader::new(stdout)),
            });
        }

        Ok(())
    }

    /// Invoke the hook on `line`, within the configured time budget.
    /// Exceeding the budget or any subprocess/protocol error yields
    /// `None`, never an `Err` — failures are swallowed and counted.
    pub fn analyze_line(&mut self, line: &str, file_path: &str, line_number: usize) -> Option<Vec<MlToken>> {
        let request = serde_json::to_string(&LineRequest {
            line,
            file_path,
            line_number,
        })
        .ok()?;
        self.invoke(&request)
    }

    /// Invoke the hook on a whole file's lines (file mode).
    pub fn analyze_file(&mut self, lines: &[String], file_path: &str) -> Option<Vec<MlToken>> {
        let request = serde_json::to_string(&FileRequest { lines, file_path }).ok()?;
        self.invoke(&request)
    }

    fn invoke(&mut self, request_line: &str) -> Option<Vec<MlToken>> {
        self.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let result = self.invoke_inner(request_line);

        self.counters
            .time_ms_total
            .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);

        match result {
            Some(tokens) => Some(tokens),
            None => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn invoke_inner(&mut self, request_line: &str) -> Option<Vec<MlToken>> {
        let budget = self.time_budget;
        self.ensure_child().ok()?;
        let running = self.child.as_mut()?;

        let mut stdin = running.process.stdin.take()?;
        writeln!(stdin, "{request_line}").ok()?;
        running.process.stdin = Some(stdin);

        let reader = running.stdout.take()?;

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = String::new();
            let read = reader.read_line(&mut buf);
            let _ = tx.send(read.map(|_| (buf, reader)));
        });

        let outcome = match budget {
            Some(budget) => rx.recv_timeout(budget).ok(),
            None => rx.recv().ok(),
        };

        // A timeout or read error leaves the reader thread holding the pipe;
        // drop the child so the next call respawns a fresh subprocess rather
        // than reusing a reader we can no longer reclaim.
        let (buf, reader) = match outcome {
            Some(Ok((buf, reader))) => (buf, reader),
            _ => {
                self.child = None;
                return None;
            }
        };

        if let Some(running) = self.child.as_mut() {
            running.stdout = Some(reader);
        }

        let parsed: HookResponse = serde_json::from_str(buf.trim()).ok()?;
        Some(parsed.tokens)
    }
}

impl Drop for MlHookBridge {
    fn drop(&mut self) {
        if let Some(mut running) = self.child.take() {
            let _ = running.process.kill();
            let _ = running.process.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_column_prefers_span_over_index() {
        let token = MlToken {
            token: "x".into(),
            index: Some(5),
            span: Some(Span { start: 2, length: 3 }),
            rule_name: None,
            severity: None,
            confidence: None,
            tags: vec![],
            message: None,
        };
        assert_eq!(token.normalized_column(), 3);
    }

    #[test]
    fn normalized_column_falls_back_to_index() {
        let token = MlToken {
            token: "x".into(),
            index: Some(5),
            span: None,
            rule_name: None,
            severity: None,
            confidence: None,
            tags: vec![],
            message: None,
        };
        assert_eq!(token.normalized_column(), 6);
    }

    #[test]
    fn normalized_severity_derives_from_confidence_when_missing() {
        let token = MlToken {
            token: "x".into(),
            index: None,
            span: None,
            rule_name: None,
            severity: None,
            confidence: Some(0.9),
            tags: vec![],
            message: None,
        };
        assert_eq!(token.normalized_severity(), Severity::High);
    }

    #[test]
    fn normalized_severity_prefers_explicit_value() {
        let token = MlToken {
            token: "x".into(),
            index: None,
            span: None,
            rule_name: None,
            severity: Some(Severity::Low),
            confidence: Some(0.99),
            tags: vec![],
            message: None,
        };
        assert_eq!(token.normalized_severity(), Severity::Low);
    }

    #[test]
    fn invoking_missing_module_returns_none_not_error() {
        let mut bridge = MlHookBridge::new("/nonexistent/hook/binary", HookMode::Line, None);
        let result = bridge.analyze_line("hello", "a.txt", 1);
        assert!(result.is_none());
        let (invocations, errors, _) = bridge.counters().snapshot();
        assert_eq!(invocations, 1);
        assert_eq!(errors, 1);
    }

    #[test]
    fn mode_flags_match_their_name() {
        assert!(HookMode::Line.wants_line());
        assert!(!HookMode::Line.wants_file());
        assert!(HookMode::File.wants_file());
        assert!(!HookMode::File.wants_line());
        assert!(HookMode::Both.wants_line());
        assert!(HookMode::Both.wants_file());
    }
}
