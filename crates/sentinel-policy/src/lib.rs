//! Policy gate (§4.K): normalizes severities, applies forbidden-rule and
//! threshold checks over a scan's findings. A small decision function
//! consumed once at the top of a run, not threaded through every call.

use sentinel_types::{Finding, Policy, Severity};

/// Process-wide exit codes shared with the CLI layer: the policy gate
/// only ever produces [`OK`] or [`POLICY_FAILURE`]; the other two are
/// reserved for CLI-level rotator dispatch and confirmation checks.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const UNHANDLED_ERROR: i32 = 1;
    pub const UNKNOWN_ROTATOR: i32 = 2;
    pub const DESTRUCTIVE_WITHOUT_CONFIRMATION: i32 = 3;
    pub const POLICY_FAILURE: i32 = 4;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyFailure {
    ForbiddenRule { rule_name: String, file_path: String, line: usize },
    SeverityThresholdExceeded { severity: Severity, count: u64, threshold: u64 },
    TotalThresholdExceeded { count: u64, threshold: u64 },
}

impl std::fmt::Display for PolicyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyFailure::ForbiddenRule { rule_name, file_path, line } => {
                write!(f, "forbidden rule {rule_name:?} matched at {file_path}:{line}")
            }
            PolicyFailure::SeverityThresholdExceeded { severity, count, threshold } => {
                write!(f, "{severity:?} finding count {count} exceeds threshold {threshold}")
            }
            PolicyFailure::TotalThresholdExceeded { count, threshold } => {
                write!(f, "total finding count {count} exceeds threshold {threshold}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub considered: Vec<Finding>,
    pub failures: Vec<PolicyFailure>,
    pub warnings: Vec<String>,
}

impl PolicyDecision {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            exit_codes::OK
        } else {
            exit_codes::POLICY_FAILURE
        }
    }
}

/// Evaluate `policy` over `findings`. `cli_min_severity` is the raw
/// `--min-severity` CLI flag value, if any; it overrides `policy.min_severity`
/// and an unparseable value is ignored with a warning rather than rejected.
pub fn evaluate(
    findings: &[Finding],
    policy: &Policy,
    cli_min_severity: Option<&str>,
) -> PolicyDecision {
    let mut warnings = Vec::new();

    let mut effective_min_severity = policy.min_severity;
    if let Some(raw) = cli_min_severity {
        match Severity::parse_lenient(raw) {
            Some(sev) => effective_min_severity = Some(sev),
            None => warnings.push(format!(
                "ignoring invalid --min-severity value {raw:?}; keeping policy default"
            )),
        }
    }

    let considered: Vec<Finding> = findings
        .iter()
        .filter(|f| {
            effective_min_severity
                .map(|min| f.severity.rank() >= min.rank())
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    let forbidden: Vec<PolicyFailure> = considered
        .iter()
        .filter(|f| policy.forbid_rules.iter().any(|r| r == &f.rule_name))
        .map(|f| PolicyFailure::ForbiddenRule {
            rule_name: f.rule_name.clone(),
            file_path: f.file_path.clone(),
            line: f.line,
        })
        .collect();

    if !forbidden.is_empty() {
        return PolicyDecision {
            considered,
            failures: forbidden,
            warnings,
        };
    }

    let mut failures = Vec::new();
    if let Some(thresholds) = &policy.thresholds {
        for (severity, limit) in [
            (Severity::High, thresholds.high),
            (Severity::Medium, thresholds.medium),
            (Severity::Low, thresholds.low),
        ] {
            if let Some(limit) = limit {
                let count = considered.iter().filter(|f| f.severity == severity).count() as u64;
                if count > limit {
                    failures.push(PolicyFailure::SeverityThresholdExceeded {
                        severity,
                        count,
                        threshold: limit,
                    });
                }
            }
        }

        if let Some(total) = thresholds.total {
            let count = considered.len() as u64;
            if count > total {
                failures.push(PolicyFailure::TotalThresholdExceeded { count, threshold: total });
            }
        }
    }

    PolicyDecision {
        considered,
        failures,
        warnings,
    }
}
