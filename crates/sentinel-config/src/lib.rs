//! Project configuration: `.secretsentinel.yaml` / `.secretsentinel.json`
//! at the base directory, falling back to `config/defaults.json` (§6).
//!
//! Every sub-config (policy, entropy, rules, ML hook) is optional and
//! defaulted so a bare `{}` file is valid.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentinel_types::{Policy, Rule};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub severity: Option<sentinel_types::Severity>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_entropy_min_length() -> usize {
    32
}

fn default_entropy_threshold() -> f64 {
    3.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfigSection {
    pub enabled: bool,
    #[serde(default = "default_entropy_min_length")]
    pub min_length: usize,
    #[serde(default = "default_entropy_threshold")]
    pub threshold: f64,
}

impl Default for EntropyConfigSection {
    fn default() -> Self {
        EntropyConfigSection {
            enabled: true,
            min_length: default_entropy_min_length(),
            threshold: default_entropy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MlHookMode {
    Line,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MlHookConfigSection {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MlHookMode>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "sentinel_duration::serialize_duration_opt",
        deserialize_with = "sentinel_duration::deserialize_duration_opt"
    )]
    pub time_budget: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegexEngine {
    Native,
    Re2,
}

impl Default for RegexEngine {
    fn default() -> Self {
        RegexEngine::Native
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfigSection {
    pub disable_builtins: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rulesets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ruleset_dirs: Vec<String>,
    #[serde(default)]
    pub engine: RegexEngine,
}

/// Root shape of `.secretsentinel.yaml` / `.secretsentinel.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelFileConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<PatternConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    pub entropy: EntropyConfigSection,
    pub ml_hook: MlHookConfigSection,
    pub rules: RulesConfigSection,
}

impl SentinelFileConfig {
    /// User patterns from config, converted into `Rule`s. Invalid entries
    /// (bad regex) are left for the rule compiler to drop with a warning —
    /// this layer does not validate regex syntax.
    pub fn user_rules(&self) -> Vec<Rule> {
        self.patterns
            .iter()
            .map(|p| Rule {
                name: p.name.clone(),
                regex: p.regex.clone(),
                severity: p.severity.unwrap_or_default(),
                enabled: p.enabled.unwrap_or(true),
            })
            .collect()
    }
}

/// Load project config from `<base_dir>/.secretsentinel.yaml`, then
/// `.secretsentinel.json`, then `<base_dir>/config/defaults.json`. Returns
/// the default (empty) config if none of these exist.
pub fn load_config(base_dir: &Path) -> Result<SentinelFileConfig> {
    let candidates = [
        (base_dir.join(".secretsentinel.yaml"), Format::Yaml),
        (base_dir.join(".secretsentinel.json"), Format::Json),
        (base_dir.join("config/defaults.json"), Format::Json),
    ];

    for (path, format) in candidates {
        if path.is_file() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            return parse(&raw, format)
                .with_context(|| format!("failed to parse {}", path.display()));
        }
    }

    Ok(SentinelFileConfig::default())
}

enum Format {
    Yaml,
    Json,
}

fn parse(raw: &str, format: Format) -> Result<SentinelFileConfig> {
    match format {
        Format::Yaml => serde_yaml::from_str(raw).context("invalid YAML"),
        Format::Json => serde_json::from_str(raw).context("invalid JSON"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_config_yields_default() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config, SentinelFileConfig::default());
    }

    #[test]
    fn loads_json_config() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".secretsentinel.json"),
            r#"{"patterns":[{"name":"Custom","regex":"foo.*"}],"policy":{"thresholds":{"high":0}}}"#,
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.patterns.len(), 1);
        assert_eq!(config.patterns[0].name, "Custom");
        assert_eq!(config.policy.unwrap().thresholds.unwrap().high, Some(0));
    }

    #[test]
    fn loads_yaml_config_before_json() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".secretsentinel.yaml"),
            "patterns:\n  - name: FromYaml\n    regex: bar.*\n",
        )
        .unwrap();
        fs::write(dir.path().join(".secretsentinel.json"), "{}").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.patterns[0].name, "FromYaml");
    }

    #[test]
    fn user_rules_defaults_severity_and_enabled() {
        let config = SentinelFileConfig {
            patterns: vec![PatternConfig {
                name: "X".into(),
                regex: "x".into(),
                severity: None,
                enabled: None,
            }],
            ..Default::default()
        };
        let rules = config.user_rules();
        assert_eq!(rules[0].severity, sentinel_types::Severity::Medium);
        assert!(rules[0].enabled);
    }
}
