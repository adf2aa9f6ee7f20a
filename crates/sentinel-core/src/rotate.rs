//! Wires the rotation coordinator to a chosen [`SecretBackend`] and to
//! the audit log: one audit event is appended per finding outcome, in
//! the order rotations complete (§5 — not scan order).

use std::path::Path;
use std::sync::Arc;

use sentinel_audit::AuditWriter;
use sentinel_backends::SecretBackend;
use sentinel_policy::exit_codes;
pub use sentinel_rotate::{
    ApplyRotator, BackendRotator, CoordinatorOptions, FindingOutcome, FindingState, Prompter,
    RotateError, RotationReport, Rotator, StdinPrompter,
};
use sentinel_types::{AuditEvent, Finding};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreRotateError {
    #[error("unknown rotator {0:?}")]
    UnknownRotator(String),
    #[error(transparent)]
    Rotate(#[from] sentinel_rotate::RotateError),
    #[error(transparent)]
    Audit(#[from] sentinel_audit::AuditError),
}

/// Resolve a rotator name (CLI `--rotator` flag) to an implementation.
/// `"backend"` requires a configured secret backend.
pub fn build_rotator(
    name: &str,
    backend: Option<Arc<dyn SecretBackend>>,
) -> Result<Box<dyn Rotator>, CoreRotateError> {
    match name {
        "apply" => Ok(Box::new(ApplyRotator)),
        "backend" => {
            let backend = backend.ok_or_else(|| CoreRotateError::UnknownRotator(name.to_string()))?;
            Ok(Box::new(BackendRotator::new(backend)))
        }
        other => Err(CoreRotateError::UnknownRotator(other.to_string())),
    }
}

fn outcome_event(outcome: &FindingOutcome) -> AuditEvent {
    let mut event = AuditEvent::new();
    event.insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
    event.insert("file".to_string(), json!(outcome.finding.file_path));
    event.insert("line".to_string(), json!(outcome.finding.line));
    event.insert("rule".to_string(), json!(outcome.finding.rule_name));
    event.insert(
        "state".to_string(),
        json!(match outcome.state {
            FindingState::Skipped => "skipped",
            FindingState::Writing => "writing",
            FindingState::FileUpdated => "file_updated",
            FindingState::Failed => "failed",
        }),
    );
    if let Some(placeholder) = &outcome.placeholder {
        event.insert("placeholder".to_string(), json!(placeholder));
    }
    if let Some(backend_key) = &outcome.backend_key {
        event.insert("backend_key".to_string(), json!(backend_key));
    }
    if let Some(error) = &outcome.error {
        event.insert("error".to_string(), json!(error));
    }
    event
}

/// Run the rotation coordinator over `findings`, then append one audit
/// event per outcome to `audit_writer` (if given) in completion order.
pub fn run_remediation(
    findings: &[Finding],
    rotator: &dyn Rotator,
    tmp_dir: &Path,
    prompter: &dyn Prompter,
    options: &CoordinatorOptions,
    audit_writer: Option<&AuditWriter>,
) -> Result<RotationReport, CoreRotateError> {
    let report = sentinel_rotate::run_rotation(findings, rotator, tmp_dir, prompter, options)?;

    if let Some(writer) = audit_writer {
        for outcome in &report.outcomes {
            writer.write_event(outcome_event(outcome))?;
        }
    }

    Ok(report)
}

/// Maps a rotation-level error to the CLI's process exit code.
pub fn exit_code_for(err: &CoreRotateError) -> i32 {
    match err {
        CoreRotateError::UnknownRotator(_) => exit_codes::UNKNOWN_ROTATOR,
        CoreRotateError::Rotate(RotateError::Refused) => exit_codes::DESTRUCTIVE_WITHOUT_CONFIRMATION,
        _ => exit_codes::UNHANDLED_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::Severity;
    use tempfile::tempdir;

    fn finding() -> Finding {
        Finding {
            file_path: String::new(),
            line: 1,
            column: 1,
            r#match: "x".into(),
            context: "x".into(),
            rule_name: "r".into(),
            severity: Severity::High,
            confidence: None,
            tags: vec![],
            message: None,
            span: None,
        }
    }

    #[test]
    fn unknown_rotator_name_is_rejected() {
        let err = build_rotator("nonexistent", None).unwrap_err();
        assert!(matches!(err, CoreRotateError::UnknownRotator(_)));
        assert_eq!(exit_code_for(&err), exit_codes::UNKNOWN_ROTATOR);
    }

    #[test]
    fn backend_rotator_without_a_backend_is_rejected() {
        let err = build_rotator("backend", None).unwrap_err();
        assert!(matches!(err, CoreRotateError::UnknownRotator(_)));
    }

    #[test]
    fn refusal_without_confirmation_maps_to_destructive_exit_code() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.env");
        std::fs::write(&path, "x\n").unwrap();
        let mut f = finding();
        f.file_path = path.to_string_lossy().into_owned();

        let rotator = build_rotator("apply", None).unwrap();
        let result = run_remediation(
            &[f],
            rotator.as_ref(),
            dir.path(),
            &StdinPrompter,
            &CoordinatorOptions::default(),
            None,
        );
        let err = result.unwrap_err();
        assert_eq!(exit_code_for(&err), exit_codes::DESTRUCTIVE_WITHOUT_CONFIRMATION);
    }

    #[test]
    fn dry_run_writes_an_audit_event_per_finding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.env");
        std::fs::write(&path, "x\n").unwrap();
        let mut f = finding();
        f.file_path = path.to_string_lossy().into_owned();

        let rotator = build_rotator("apply", None).unwrap();
        let audit_path = dir.path().join("audit.ndjson");
        let writer = AuditWriter::new(&audit_path);
        let options = CoordinatorOptions { dry_run: true, ..CoordinatorOptions::default() };

        let report = run_remediation(
            &[f],
            rotator.as_ref(),
            dir.path(),
            &StdinPrompter,
            &options,
            Some(&writer),
        )
        .unwrap();

        assert_eq!(report.outcomes.len(), 1);
        let verify = sentinel_audit::verify_file(&audit_path, &sentinel_audit::VerifyOptions::default()).unwrap();
        assert!(verify.valid());
        assert_eq!(verify.event_count, 1);
    }
}
