use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use sentinel_backends::{AwsSecretsBackend, FileBackend, SecretBackend, VaultBackend};
use sentinel_core::policy::exit_codes;
use sentinel_core::rotate::{build_rotator, run_remediation, CoordinatorOptions, StdinPrompter};
use sentinel_core::scan::{run_scan, sorted_findings, RunScanOptions};
use sentinel_core::{marketplace, policy, Finding};
use sentinel_mlhook::HookMode;
use sentinel_retry::RetryConfig;

fn parse_hook_mode(s: &str) -> Result<HookMode> {
    match s {
        "line" => Ok(HookMode::Line),
        "file" => Ok(HookMode::File),
        "both" => Ok(HookMode::Both),
        other => bail!("unknown ML hook mode: {other}"),
    }
}

#[derive(Parser, Debug)]
#[command(name = "sentinel", version)]
#[command(about = "Repository-wide secret scanner, policy gate, and rotator")]
struct Cli {
    /// Project root: where `.secretsentinel.{yaml,json}` and ignore files live.
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Path to scan; defaults to `base_dir`. May be a single file.
    #[arg(long)]
    target: Option<PathBuf>,

    /// Cache file for incremental rescans.
    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Only scan files changed since `--git-base` (default `HEAD`).
    #[arg(long)]
    incremental: bool,

    #[arg(long, default_value = "HEAD")]
    git_base: String,

    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Dispatch extensionless/unrecognized files to the binary detector.
    #[arg(long)]
    binary_enabled: bool,

    /// Re-read files even when mtime/size match the cache (compares content hash instead).
    #[arg(long)]
    hash_mode: bool,

    /// Repeatable extra ignore pattern (gitignore syntax).
    #[arg(long = "ignore")]
    extra_ignore: Vec<String>,

    /// Overrides the configured policy minimum severity.
    #[arg(long)]
    min_severity: Option<String>,

    /// Path to an out-of-process ML hook module/executable (§4.C).
    #[arg(long)]
    ml_hook_module: Option<PathBuf>,

    /// ML hook invocation granularity.
    #[arg(long, default_value = "line", value_parser = ["line", "file", "both"])]
    ml_hook_mode: String,

    /// Per-invocation time budget for the ML hook, e.g. `200ms`.
    #[arg(long)]
    ml_hook_time_budget: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the target and print findings, gated by policy.
    Scan {
        /// Write findings to this path instead of stdout.
        #[arg(long)]
        export: Option<PathBuf>,
        #[arg(long, default_value = "text", value_parser = ["text", "json", "csv"])]
        format: String,
    },
    /// Scan, then rotate every surviving finding out of its file.
    Rotate {
        /// Rotator implementation: `apply` (placeholder only) or `backend`.
        #[arg(long, default_value = "apply")]
        rotator: String,
        /// Secret backend for the `backend` rotator: `file`, `vault`, or `aws`.
        #[arg(long, default_value = "file")]
        backend: String,
        #[arg(long, default_value = ".sentinel/secrets.json")]
        file_store: PathBuf,
        #[arg(long, default_value = "secret")]
        vault_mount: String,
        #[arg(long, default_value = "sentinel")]
        vault_base: String,
        #[arg(long, default_value = "sentinel/")]
        aws_prefix: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        interactive: bool,
        /// Placeholder template, e.g. `"masked::{{match}}"`.
        #[arg(long)]
        template: Option<String>,
        /// Read the secret back from the backend before substituting the reference.
        #[arg(long)]
        verify: bool,
        #[arg(long, default_value_t = 4)]
        rotate_concurrency: usize,
        #[arg(long)]
        tmp_dir: Option<PathBuf>,
        #[arg(long, default_value = ".sentinel/audit.ndjson")]
        audit_log: PathBuf,
        #[arg(long, env = "SENTINEL_AUDIT_KEY")]
        audit_key: Option<String>,
        #[arg(long)]
        audit_key_id: Option<String>,
    },
    /// Verify the hash chain (and optional signatures) of an audit log.
    AuditVerify {
        #[arg(long, default_value = ".sentinel/audit.ndjson")]
        path: PathBuf,
        #[arg(long, env = "SENTINEL_AUDIT_KEY")]
        key: Option<String>,
        #[arg(long)]
        check_timestamps: bool,
        #[arg(long)]
        allow_duplicates: bool,
    },
    /// Fetch, verify, and install rulesets from a catalog.
    MarketplaceInstall {
        /// Catalog URL or local path.
        #[arg(long)]
        catalog: String,
        /// Ruleset names to install (repeatable).
        #[arg(long = "name")]
        names: Vec<String>,
        #[arg(long, default_value = ".sentinel/rulesets")]
        cache_dir: PathBuf,
        #[arg(long)]
        require_signed: bool,
        #[arg(long)]
        require_catalog_signature: bool,
        #[arg(long)]
        catalog_pubkey: Option<String>,
    },
}

struct CliReporter;

impl sentinel_core::Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {}", sentinel_sanitize::mask(msg));
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {}", sentinel_sanitize::mask(msg));
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {}", sentinel_sanitize::mask(msg));
    }
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn print_findings_text(findings: &[Finding]) {
    for f in findings {
        println!(
            "{}:{}:{}: [{:?}] {} ({})",
            f.file_path, f.line, f.column, f.severity, f.rule_name, sentinel_sanitize::mask(&f.r#match)
        );
    }
}

fn export_findings(findings: &[Finding], format: &str, path: Option<&std::path::Path>) -> Result<()> {
    let rendered = match format {
        "json" => serde_json::to_string_pretty(
            &findings
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "file": f.file_path,
                        "line": f.line,
                        "column": f.column,
                        "match": f.r#match,
                        "rule": f.rule_name,
                        "severity": format!("{:?}", f.severity),
                    })
                })
                .collect::<Vec<_>>(),
        )?,
        "csv" => {
            let mut out = String::from("file,line,column,match\n");
            for f in findings {
                out.push_str(&csv_quote(&f.file_path));
                out.push(',');
                out.push_str(&f.line.to_string());
                out.push(',');
                out.push_str(&f.column.to_string());
                out.push(',');
                out.push_str(&csv_quote(&f.r#match));
                out.push('\n');
            }
            out
        }
        "text" => {
            print_findings_text(findings);
            return Ok(());
        }
        other => bail!("unsupported export format: {other}"),
    };

    match path {
        Some(path) => std::fs::write(path, rendered).context("failed to write export file")?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn csv_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn run_scan_and_gate(cli: &Cli, reporter: &mut dyn sentinel_core::Reporter) -> Result<(Vec<Finding>, policy::PolicyDecision)> {
    let target = cli.target.clone().unwrap_or_else(|| cli.base_dir.clone());
    let mut scan_options = RunScanOptions::default();
    scan_options.scan.concurrency = cli.concurrency;
    scan_options.scan.cache_path = cli.cache_path.clone();
    scan_options.scan.incremental = cli.incremental;
    scan_options.scan.git_base = cli.git_base.clone();
    scan_options.scan.extra_ignore_patterns = cli.extra_ignore.clone();
    scan_options.scan.binary_enabled = cli.binary_enabled;
    scan_options.scan.hash_mode = cli.hash_mode;
    scan_options.ml_hook_module = cli.ml_hook_module.clone();
    scan_options.ml_hook_mode = parse_hook_mode(&cli.ml_hook_mode)?;
    scan_options.ml_hook_time_budget = cli
        .ml_hook_time_budget
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    let report = run_scan(&cli.base_dir, &target, &scan_options)?;
    for warning in &report.rule_warnings {
        reporter.warn(&format!("rule {:?}: {}", warning.rule_name, warning.message));
    }
    for skip in &report.outcome.skip_reasons {
        reporter.info(&format!("skipped: {skip:?}"));
    }

    let findings = sorted_findings(report.outcome.findings);

    let config = sentinel_config::load_config(&cli.base_dir)?;
    let policy = config.policy.unwrap_or_default();
    let decision = policy::gate(&findings, &policy, cli.min_severity.as_deref());
    for warning in &decision.warnings {
        reporter.warn(warning);
    }

    Ok((findings, decision))
}

fn build_backend(cli_backend: &str, cli: &Cli) -> Result<Arc<dyn SecretBackend>> {
    match cli_backend {
        "file" => {
            let (file_store,) = match &cli.cmd {
                Commands::Rotate { file_store, .. } => (file_store.clone(),),
                _ => bail!("file backend requested outside of rotate"),
            };
            Ok(Arc::new(FileBackend::new(file_store).with_retry_config(RetryConfig::default())))
        }
        "vault" => {
            let (mount, base) = match &cli.cmd {
                Commands::Rotate { vault_mount, vault_base, .. } => (vault_mount.clone(), vault_base.clone()),
                _ => bail!("vault backend requested outside of rotate"),
            };
            Ok(Arc::new(VaultBackend::from_env(mount, base)?))
        }
        "aws" => {
            let prefix = match &cli.cmd {
                Commands::Rotate { aws_prefix, .. } => aws_prefix.clone(),
                _ => bail!("aws backend requested outside of rotate"),
            };
            Ok(Arc::new(AwsSecretsBackend::from_env(prefix)?))
        }
        other => bail!("unknown backend: {other}"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    let exit_code = match &cli.cmd {
        Commands::Scan { export, format } => {
            let (findings, decision) = run_scan_and_gate(&cli, &mut reporter)?;
            export_findings(&findings, format, export.as_deref())?;
            for failure in &decision.failures {
                reporter.error(&failure.to_string());
            }
            decision.exit_code()
        }
        Commands::Rotate {
            rotator,
            backend,
            dry_run,
            force,
            interactive,
            template,
            verify,
            rotate_concurrency,
            tmp_dir,
            audit_log,
            audit_key,
            audit_key_id,
            ..
        } => {
            let (_findings, decision) = run_scan_and_gate(&cli, &mut reporter)?;
            if !decision.passed() {
                for failure in &decision.failures {
                    reporter.error(&failure.to_string());
                }
                return std::process::exit(decision.exit_code());
            }

            let backend_arc = if rotator == "backend" {
                Some(build_backend(backend, &cli)?)
            } else {
                None
            };
            let rotator_impl = build_rotator(rotator, backend_arc)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;

            let tmp_dir = match tmp_dir {
                Some(dir) => dir.clone(),
                None => sentinel_fsupdate::default_tmp_dir(&cli.base_dir)?,
            };

            let audit_writer = sentinel_audit::AuditWriter::new(audit_log.clone());
            let audit_writer = match audit_key {
                Some(key) => audit_writer.with_signing_key(key.as_bytes(), audit_key_id.clone()),
                None => audit_writer,
            };

            let options = CoordinatorOptions {
                dry_run: *dry_run,
                force: *force,
                interactive: *interactive,
                template: template.clone(),
                verify: *verify,
                rotate_concurrency: *rotate_concurrency,
            };

            match run_remediation(
                &decision.considered,
                rotator_impl.as_ref(),
                &tmp_dir,
                &StdinPrompter,
                &options,
                Some(&audit_writer),
            ) {
                Ok(report) => {
                    reporter.info(&format!(
                        "{} file(s) updated, {} failed",
                        report.updated_count(),
                        report.failed_count()
                    ));
                    for outcome in &report.outcomes {
                        if let Some(err) = &outcome.error {
                            reporter.error(&format!("{}:{}: {err}", outcome.finding.file_path, outcome.finding.line));
                        }
                    }
                    exit_codes::OK
                }
                Err(err) => {
                    reporter.error(&err.to_string());
                    sentinel_core::rotate::exit_code_for(&err)
                }
            }
        }
        Commands::AuditVerify { path, key, check_timestamps, allow_duplicates } => {
            let options = sentinel_audit::VerifyOptions {
                signing_key: key.as_ref().map(|k| k.as_bytes().to_vec()),
                allow_duplicate_hashes: *allow_duplicates,
                check_timestamps: *check_timestamps,
                ..sentinel_audit::VerifyOptions::default()
            };
            let report = sentinel_audit::verify_file(path, &options)?;
            for error in &report.errors {
                reporter.error(&format!("line {}: {}", error.line_number, error.message));
            }
            for warning in &report.warnings {
                reporter.warn(&format!("line {}: {}", warning.line_number, warning.message));
            }
            reporter.info(&format!("{} event(s) checked", report.event_count));
            if report.valid() {
                exit_codes::OK
            } else {
                exit_codes::POLICY_FAILURE
            }
        }
        Commands::MarketplaceInstall { catalog, names, cache_dir, require_signed, require_catalog_signature, catalog_pubkey } => {
            let client = marketplace::MarketplaceClient::new()?;
            let options = marketplace::MarketplaceOptions {
                cache_dir: cache_dir.clone(),
                require_signed: *require_signed,
                require_catalog_signature: *require_catalog_signature,
                catalog_pubkey_override: catalog_pubkey.clone(),
            };
            let installed = client.install(catalog, names, &options)?;
            for ruleset in &installed {
                reporter.info(&format!("installed {} ({} bytes) -> {}", ruleset.name, ruleset.bytes, ruleset.path.display()));
            }
            exit_codes::OK
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_handles_valid_and_invalid_inputs() {
        assert!(parse_duration("1s").is_ok());
        assert!(parse_duration("nope").is_err());
    }

    #[test]
    fn csv_quote_doubles_embedded_quotes() {
        assert_eq!(csv_quote(r#"a"b"#), r#""a""b""#);
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut reporter = CliReporter;
        sentinel_core::Reporter::info(&mut reporter, "hello");
        sentinel_core::Reporter::warn(&mut reporter, "careful");
        sentinel_core::Reporter::error(&mut reporter, "oops");
    }
}
