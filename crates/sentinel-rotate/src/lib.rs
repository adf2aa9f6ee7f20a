//! Rotation coordinator (§4.I): groups findings by file so exactly one
//! worker ever mutates a given file, computing an approval and a
//! replacement per finding before a single [`sentinel_fsupdate::safe_update`]
//! call per file. Worker-pool shape and atomic-next-index dispatch match
//! `sentinel_scan`'s own pool, with files standing in for scan candidates.

mod apply;
mod backend;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sentinel_types::Finding;
use thiserror::Error;

pub use apply::ApplyRotator;
pub use backend::BackendRotator;

#[derive(Debug, Error)]
pub enum RotateError {
    #[error("rotation refused: rotator is destructive and none of dry-run, force, or interactive holds")]
    Refused,
    #[error("secret verification failed after put for key {0}")]
    VerificationFailed(String),
    #[error(transparent)]
    Backend(#[from] sentinel_backends::BackendError),
    #[error(transparent)]
    Update(#[from] sentinel_fsupdate::UpdateError),
}

/// `prepare()`'s result: the raw matched text to replace, the fully
/// resolved placeholder (template-expanded already), and, for backends,
/// the key that must be rolled back if the file write never lands.
#[derive(Debug, Clone)]
pub struct PreparedReplacement {
    pub raw: String,
    pub placeholder: String,
    pub backend_key: Option<String>,
}

/// Per-rotator-kind logic: how to turn one finding into a replacement.
/// The replacement mechanism itself (literal substring substitution via
/// one `safe_update` per file) is shared across every rotator.
pub trait Rotator: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_destructive(&self) -> bool;
    fn prepare(
        &self,
        finding: &Finding,
        template: Option<&str>,
        ts: &str,
        file: &str,
        verify: bool,
    ) -> Result<PreparedReplacement, RotateError>;
    /// Best-effort cleanup of a prepared replacement that will never be
    /// written to disk (verify failed, or the file write itself failed).
    fn rollback(&self, _prepared: &PreparedReplacement) {}
}

/// Asks for interactive approval; the env override lets automation and
/// tests bypass stdin entirely.
pub trait Prompter: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

pub const INTERACTIVE_CONFIRM_ENV: &str = "SENTINEL_ROTATE_CONFIRM";

pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, message: &str) -> bool {
        if let Ok(v) = std::env::var(INTERACTIVE_CONFIRM_ENV) {
            return matches!(v.to_ascii_lowercase().as_str(), "y" | "yes" | "true" | "1");
        }
        eprint!("{message} [y/N] ");
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingState {
    Skipped,
    Writing,
    FileUpdated,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FindingOutcome {
    pub finding: Finding,
    pub state: FindingState,
    pub placeholder: Option<String>,
    pub backend_key: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub dry_run: bool,
    pub force: bool,
    pub interactive: bool,
    pub template: Option<String>,
    pub verify: bool,
    pub rotate_concurrency: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            dry_run: false,
            force: false,
            interactive: false,
            template: None,
            verify: false,
            rotate_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationReport {
    pub outcomes: Vec<FindingOutcome>,
}

impl RotationReport {
    pub fn updated_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == FindingState::FileUpdated)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == FindingState::Failed)
            .count()
    }
}

/// All-digits timestamp (no literal `T`/`Z`/`-`/`:` separators), since this
/// value is substituted into `{{timestamp}}` and rotator-default
/// placeholders that callers may match against a digits-only pattern.
fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Expand `{{match}}`, `{{timestamp}}`, `{{file}}`, and (when `reference`
/// is given) `{{ref}}` in a user-supplied template.
pub(crate) fn expand_template(
    template: &str,
    finding: &Finding,
    ts: &str,
    file: &str,
    reference: Option<&str>,
) -> String {
    let mut out = template
        .replace("{{match}}", &finding.r#match)
        .replace("{{timestamp}}", ts)
        .replace("{{file}}", file);
    if let Some(r) = reference {
        out = out.replace("{{ref}}", r);
    }
    out
}

/// Run the coordinator over `findings`, writing through `tmp_dir` for
/// backup/temp files. Returns [`RotateError::Refused`] before touching
/// anything if the rotator is destructive and none of dry-run, force, or
/// interactive was requested.
pub fn run_rotation(
    findings: &[Finding],
    rotator: &dyn Rotator,
    tmp_dir: &Path,
    prompter: &dyn Prompter,
    options: &CoordinatorOptions,
) -> Result<RotationReport, RotateError> {
    if rotator.is_destructive() && !options.dry_run && !options.force && !options.interactive {
        return Err(RotateError::Refused);
    }

    let mut groups: BTreeMap<PathBuf, Vec<Finding>> = BTreeMap::new();
    for finding in findings {
        groups
            .entry(PathBuf::from(&finding.file_path))
            .or_default()
            .push(finding.clone());
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    let entries: Vec<(PathBuf, Vec<Finding>)> = groups.into_iter().collect();
    if entries.is_empty() {
        return Ok(RotationReport { outcomes: Vec::new() });
    }

    let next_index = AtomicUsize::new(0);
    let outcomes = Mutex::new(Vec::new());
    let worker_count = options.rotate_concurrency.max(1).min(entries.len());

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                let idx = next_index.fetch_add(1, Ordering::SeqCst);
                if idx >= entries.len() {
                    break;
                }
                let (path, group) = &entries[idx];
                let file_outcomes =
                    process_file_group(path, group, rotator, tmp_dir, prompter, options);
                outcomes
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .extend(file_outcomes);
            });
        }
    });

    Ok(RotationReport {
        outcomes: outcomes.into_inner().unwrap_or_else(|p| p.into_inner()),
    })
}

/// Process every finding in one file's group sequentially (so only one
/// `safe_update` is ever in flight for this file), then issue that one
/// `safe_update` for every finding approved and successfully prepared.
fn process_file_group(
    path: &Path,
    findings: &[Finding],
    rotator: &dyn Rotator,
    tmp_dir: &Path,
    prompter: &dyn Prompter,
    options: &CoordinatorOptions,
) -> Vec<FindingOutcome> {
    let file_str = path.to_string_lossy().into_owned();
    let mut outcomes = Vec::with_capacity(findings.len());
    let mut prepared: Vec<(usize, PreparedReplacement)> = Vec::new();

    for (idx, finding) in findings.iter().enumerate() {
        let approved = if options.dry_run {
            false
        } else if options.interactive {
            prompter.confirm(&format!(
                "Rotate {} match in {} (line {})?",
                finding.rule_name, file_str, finding.line
            ))
        } else {
            options.force
        };

        if !approved {
            outcomes.push(FindingOutcome {
                finding: finding.clone(),
                state: FindingState::Skipped,
                placeholder: None,
                backend_key: None,
                error: None,
            });
            continue;
        }

        let ts = timestamp();
        match rotator.prepare(finding, options.template.as_deref(), &ts, &file_str, options.verify) {
            Ok(replacement) => {
                outcomes.push(FindingOutcome {
                    finding: finding.clone(),
                    state: FindingState::Writing,
                    placeholder: Some(replacement.placeholder.clone()),
                    backend_key: replacement.backend_key.clone(),
                    error: None,
                });
                prepared.push((idx, replacement));
            }
            Err(err) => {
                outcomes.push(FindingOutcome {
                    finding: finding.clone(),
                    state: FindingState::Failed,
                    placeholder: None,
                    backend_key: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    if prepared.is_empty() {
        return outcomes;
    }

    let replacements: Vec<(String, String)> = prepared
        .iter()
        .map(|(_, r)| (r.raw.clone(), r.placeholder.clone()))
        .collect();

    match apply_replacements(path, tmp_dir, &replacements) {
        Ok(()) => {
            for (idx, _) in &prepared {
                outcomes[*idx].state = FindingState::FileUpdated;
            }
        }
        Err(err) => {
            for (idx, replacement) in &prepared {
                rotator.rollback(replacement);
                outcomes[*idx].state = FindingState::Failed;
                outcomes[*idx].error =
                    Some(format!("file update failed (rollback done): {err}"));
            }
        }
    }

    outcomes
}

fn apply_replacements(
    path: &Path,
    tmp_dir: &Path,
    replacements: &[(String, String)],
) -> Result<(), sentinel_fsupdate::UpdateError> {
    sentinel_fsupdate::safe_update(path, tmp_dir, |content| {
        let mut updated = content.to_string();
        for (raw, placeholder) in replacements {
            updated = updated.replace(raw.as_str(), placeholder.as_str());
        }
        updated
    })
    .map(|_| ())
}
