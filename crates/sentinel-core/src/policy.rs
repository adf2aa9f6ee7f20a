//! Thin wrapper around [`sentinel_policy::evaluate`] that also decides
//! the process exit code, re-exported here so the CLI only needs this
//! crate's dependency surface.

pub use sentinel_policy::{exit_codes, PolicyDecision, PolicyFailure};
use sentinel_types::{Finding, Policy};

/// Evaluate `policy` over `findings`, applying `cli_min_severity` as an
/// override (an unparseable value is ignored with a warning).
pub fn gate(findings: &[Finding], policy: &Policy, cli_min_severity: Option<&str>) -> PolicyDecision {
    sentinel_policy::evaluate(findings, policy, cli_min_severity)
}
