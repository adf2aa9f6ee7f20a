//! Rule compiler and registry (§4.A). Merges three sources in order:
//! built-ins, curated rulesets selected by configuration, and user
//! patterns from project config. Invalid regexes are dropped with a
//! warning, never fatal. A process-wide cache memoizes compiled sets by
//! `(engine, base_dir, disable_builtins, rulesets, ruleset_dirs)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use sentinel_config::{RegexEngine, SentinelFileConfig};
use sentinel_types::{Rule, Severity};

/// A rule with its compiled regex, ready for use by a detector.
#[derive(Clone)]
pub struct CompiledRule {
    pub name: String,
    pub severity: Severity,
    pub regex: Regex,
}

/// Built-in rules, always loaded unless `disable_builtins` is set.
fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "AWS Access Key ID".into(),
            regex: r"AKIA[0-9A-Z]{16}".into(),
            severity: Severity::High,
            enabled: true,
        },
        Rule {
            name: "Generic API Key".into(),
            regex: r#"(?i)api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9_\-]{16,}"#.into(),
            severity: Severity::Medium,
            enabled: true,
        },
        Rule {
            name: "JWT-Like".into(),
            regex: r"eyJ[A-Za-z0-9_-]+\.eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+".into(),
            severity: Severity::Low,
            enabled: true,
        },
    ]
}

/// Curated rulesets bundled with sentinel, selectable by name
/// (`rules.rulesets` in project config). These ship alongside the binary;
/// a marketplace-installed ruleset under `ruleset_dirs` can add more by
/// name at runtime.
fn curated_ruleset(name: &str) -> Option<Vec<Rule>> {
    match name {
        "common" => Some(vec![
            Rule {
                name: "Slack Token".into(),
                regex: r"xox[baprs]-[0-9A-Za-z-]{10,}".into(),
                severity: Severity::High,
                enabled: true,
            },
            Rule {
                name: "Private Key Block".into(),
                regex: r"-----BEGIN (RSA |EC |OPENSSH |DSA )?PRIVATE KEY-----".into(),
                severity: Severity::High,
                enabled: true,
            },
        ]),
        "cloud" => Some(vec![
            Rule {
                name: "GCP Service Account Key".into(),
                regex: r#""type"\s*:\s*"service_account""#.into(),
                severity: Severity::High,
                enabled: true,
            },
            Rule {
                name: "Azure Storage Key".into(),
                regex: r"AccountKey=[A-Za-z0-9+/=]{20,}".into(),
                severity: Severity::High,
                enabled: true,
            },
        ]),
        _ => None,
    }
}

/// Load a ruleset from `<dir>/<name>.ruleset.json` (the format the
/// marketplace installs into a cache dir).
fn load_ruleset_from_dir(dir: &Path, name: &str) -> Option<Vec<Rule>> {
    let path = dir.join(format!("{name}.ruleset.json"));
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<Vec<Rule>>(&raw).ok()
}

/// The (engine, base_dir, disable_flag, rulesets, ruleset_dirs) key a
/// compiled set is memoized by.
#[derive(Clone, PartialEq, Eq, Hash)]
struct RulesetKey {
    engine: String,
    base_dir: PathBuf,
    disable_builtins: bool,
    rulesets: Vec<String>,
    ruleset_dirs: Vec<String>,
}

static CACHE: OnceLock<Mutex<HashMap<RulesetKey, Arc<Vec<CompiledRule>>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<RulesetKey, Arc<Vec<CompiledRule>>>> {
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A warning raised while compiling the rule set (never fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWarning {
    pub rule_name: String,
    pub message: String,
}

/// Compile the effective rule set for `base_dir`: built-ins (unless
/// disabled), curated rulesets named in config, ruleset-dir JSON files,
/// and user patterns from `.secretsentinel.{yaml,json}`, all merged in
/// that order. Invalid regexes are dropped with a warning.
pub fn load_rules(base_dir: &Path) -> anyhow::Result<(Vec<CompiledRule>, Vec<RuleWarning>)> {
    let config = sentinel_config::load_config(base_dir)?;
    Ok(load_rules_with_config(base_dir, &config))
}

pub fn load_rules_with_config(
    base_dir: &Path,
    config: &SentinelFileConfig,
) -> (Vec<CompiledRule>, Vec<RuleWarning>) {
    let engine_name = match config.rules.engine {
        RegexEngine::Native => "native",
        RegexEngine::Re2 => "re2",
    };

    let key = RulesetKey {
        engine: engine_name.to_string(),
        base_dir: base_dir.to_path_buf(),
        disable_builtins: config.rules.disable_builtins,
        rulesets: config.rules.rulesets.clone(),
        ruleset_dirs: config.rules.ruleset_dirs.clone(),
    };

    {
        let guard = cache().lock().unwrap();
        if let Some(compiled) = guard.get(&key) {
            return ((*compiled).clone(), Vec::new());
        }
    }

    let mut raw_rules = Vec::new();
    if !config.rules.disable_builtins {
        raw_rules.extend(builtin_rules());
    }
    for name in &config.rules.rulesets {
        if let Some(rules) = curated_ruleset(name) {
            raw_rules.extend(rules);
        }
        for dir in &config.rules.ruleset_dirs {
            if let Some(rules) = load_ruleset_from_dir(Path::new(dir), name) {
                raw_rules.extend(rules);
            }
        }
    }
    raw_rules.extend(config.user_rules());

    let (compiled, warnings) = compile(raw_rules, config.rules.engine);

    let mut guard = cache().lock().unwrap();
    guard.insert(key, Arc::new(compiled.clone()));
    (compiled, warnings)
}

/// Compile a raw rule list, dropping entries whose regex fails and
/// (for `re2`) whose pattern isn't re2-compatible by falling back to the
/// default engine's compiler — this crate has only one regex backend
/// available, so `re2` selection degrades to `native` transparently.
fn compile(rules: Vec<Rule>, _engine: RegexEngine) -> (Vec<CompiledRule>, Vec<RuleWarning>) {
    let mut compiled = Vec::new();
    let mut warnings = Vec::new();

    for rule in rules {
        if !rule.enabled {
            continue;
        }
        match Regex::new(&rule.regex) {
            Ok(regex) => compiled.push(CompiledRule {
                name: rule.name,
                severity: rule.severity,
                regex,
            }),
            Err(err) => warnings.push(RuleWarning {
                rule_name: rule.name,
                message: err.to_string(),
            }),
        }
    }

    (compiled, warnings)
}
