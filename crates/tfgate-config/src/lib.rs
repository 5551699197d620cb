//! Configuration loading and merging for tfgate.
//!
//! Precedence, lowest first: the built-in SFTP scenario, `tfgate.toml`,
//! then `TFGATE_*` environment variables. CLI flags are applied by the
//! binary on top of the result.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tfgate_error::ConfigError;
use tfgate_types::{ConfigFile, RetryPolicy, RetrySection, ScenarioConfig, ScenarioSection};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "tfgate.toml";

pub const ENV_TERRAFORM_DIR: &str = "TFGATE_TERRAFORM_DIR";
pub const ENV_TERRAFORM_BINARY: &str = "TFGATE_TERRAFORM_BINARY";

/// Read and parse a config file.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(path, &text)
}

pub fn parse_config_str(path: &Path, text: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

/// Load a scenario from `path`, resolving relative module paths against the
/// file's directory. `None` yields the built-in SFTP scenario.
pub fn load_scenario(path: Option<&Path>) -> Result<ScenarioConfig, ConfigError> {
    match path {
        Some(path) => {
            let file = load_config_file(path)?;
            let base_dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            debug!(config = %path.display(), "loaded scenario config");
            resolve_scenario(&file, base_dir)
        }
        None => {
            let cfg = ScenarioConfig::sftp_default();
            validate_scenario(&cfg)?;
            Ok(cfg)
        }
    }
}

/// Merge a parsed config file over the built-in scenario.
///
/// A non-empty `[vars]` table replaces the built-in variables wholesale, so a
/// config aimed at another module never inherits SFTP inputs.
pub fn resolve_scenario(
    file: &ConfigFile,
    base_dir: Option<&Path>,
) -> Result<ScenarioConfig, ConfigError> {
    let mut cfg = ScenarioConfig::sftp_default();
    let section = &file.scenario;

    if let Some(name) = &section.name {
        cfg.name = name.clone();
    }
    if let Some(dir) = &section.terraform_dir {
        cfg.terraform_dir = resolve_dir(dir, base_dir);
    }
    if let Some(binary) = &section.terraform_binary {
        cfg.terraform_binary = binary.clone();
    }
    if let Some(outputs) = &section.outputs {
        cfg.expected_outputs = outputs.clone();
    }
    if let Some(lock) = section.lock {
        cfg.lock = lock;
    }
    if let Some(no_color) = section.no_color {
        cfg.no_color = no_color;
    }
    if let Some(timeout) = &section.command_timeout {
        cfg.command_timeout = Some(parse_duration_field("scenario.command_timeout", timeout)?);
    }

    if !file.vars.is_empty() {
        cfg.vars = file.vars.clone();
    }
    cfg.env.extend(file.env.clone());

    if let Some(retry) = &file.retry {
        cfg.retry = merge_retry(cfg.retry, retry)?;
    }

    validate_scenario(&cfg)?;
    Ok(cfg)
}

fn resolve_dir(dir: &str, base_dir: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(dir);
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

fn merge_retry(mut policy: RetryPolicy, section: &RetrySection) -> Result<RetryPolicy, ConfigError> {
    if let Some(max) = section.max_retries {
        policy.max_retries = max;
    }
    if let Some(between) = &section.time_between_retries {
        policy.time_between_retries = parse_duration_field("retry.time_between_retries", between)?;
    }
    if section.replace_defaults {
        policy.retryable_errors.clear();
    }
    policy
        .retryable_errors
        .extend(section.retryable_errors.clone());
    Ok(policy)
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|_| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Apply `TFGATE_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(cfg: &mut ScenarioConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(ENV_TERRAFORM_DIR).filter(|v| !v.is_empty()) {
        debug!(terraform_dir = %dir, "terraform dir overridden from environment");
        cfg.terraform_dir = PathBuf::from(dir);
    }
    if let Some(binary) = lookup(ENV_TERRAFORM_BINARY).filter(|v| !v.is_empty()) {
        debug!(terraform_binary = %binary, "terraform binary overridden from environment");
        cfg.terraform_binary = binary;
    }
}

pub fn apply_process_env_overrides(cfg: &mut ScenarioConfig) {
    apply_env_overrides(cfg, |key| std::env::var(key).ok());
}

/// Structural checks only; variable values are Terraform's business.
pub fn validate_scenario(cfg: &ScenarioConfig) -> Result<(), ConfigError> {
    if cfg.name.trim().is_empty() {
        return Err(invalid("scenario.name", "must not be empty"));
    }
    if cfg.terraform_dir.as_os_str().is_empty() {
        return Err(invalid("scenario.terraform_dir", "must not be empty"));
    }
    if cfg.terraform_binary.trim().is_empty() {
        return Err(invalid("scenario.terraform_binary", "must not be empty"));
    }
    if cfg.expected_outputs.is_empty() {
        return Err(invalid("scenario.outputs", "must list at least one output"));
    }

    let mut seen = BTreeMap::new();
    for name in &cfg.expected_outputs {
        if name.trim().is_empty() {
            return Err(invalid("scenario.outputs", "output names must not be blank"));
        }
        if seen.insert(name.as_str(), ()).is_some() {
            return Err(invalid(
                "scenario.outputs",
                &format!("duplicate output name {name:?}"),
            ));
        }
    }

    for pattern in cfg.retry.retryable_errors.keys() {
        regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// The built-in SFTP scenario expressed as a config file.
pub fn default_config_file() -> ConfigFile {
    let cfg = ScenarioConfig::sftp_default();
    ConfigFile {
        scenario: ScenarioSection {
            name: Some(cfg.name),
            terraform_dir: Some(cfg.terraform_dir.to_string_lossy().into_owned()),
            terraform_binary: Some(cfg.terraform_binary),
            outputs: Some(cfg.expected_outputs),
            lock: Some(cfg.lock),
            no_color: Some(cfg.no_color),
            command_timeout: None,
        },
        retry: Some(RetrySection {
            max_retries: Some(cfg.retry.max_retries),
            time_between_retries: Some(
                humantime::format_duration(cfg.retry.time_between_retries).to_string(),
            ),
            retryable_errors: BTreeMap::new(),
            replace_defaults: false,
        }),
        env: cfg.env,
        vars: cfg.vars,
    }
}

pub fn render_config_toml(file: &ConfigFile) -> Result<String, ConfigError> {
    toml::to_string_pretty(file).map_err(|e| ConfigError::Serialize {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tfgate_types::VarValue;

    #[test]
    fn no_config_yields_sftp_default() {
        let cfg = load_scenario(None).expect("default scenario is valid");
        assert_eq!(cfg, ScenarioConfig::sftp_default());
    }

    #[test]
    fn printed_default_config_loads_back_to_same_scenario() {
        let text = render_config_toml(&default_config_file()).expect("serialize");
        let file = parse_config_str(Path::new("tfgate.toml"), &text).expect("parse");
        let cfg = resolve_scenario(&file, None).expect("resolve");
        assert_eq!(cfg, ScenarioConfig::sftp_default());
    }

    #[test]
    fn relative_module_dir_resolves_against_config_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tfgate.toml");
        fs::write(&path, "[scenario]\nterraform_dir = \"modules/sftp\"\n").unwrap();

        let cfg = load_scenario(Some(&path)).unwrap();
        assert_eq!(cfg.terraform_dir, dir.path().join("modules/sftp"));
    }

    #[test]
    fn vars_table_replaces_builtin_vars() {
        let file = parse_config_str(
            Path::new("x.toml"),
            "[vars]\nregion = \"eu-west-1\"\n",
        )
        .unwrap();
        let cfg = resolve_scenario(&file, None).unwrap();
        assert_eq!(cfg.vars.len(), 1);
        assert_eq!(cfg.vars["region"], VarValue::from("eu-west-1"));
    }

    #[test]
    fn retry_section_merges_over_defaults() {
        let file = parse_config_str(
            Path::new("x.toml"),
            r#"
[retry]
max_retries = 1
time_between_retries = "250ms"

[retry.retryable_errors]
".*ThrottlingException.*" = "AWS API throttling."
"#,
        )
        .unwrap();
        let cfg = resolve_scenario(&file, None).unwrap();
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.time_between_retries, Duration::from_millis(250));
        assert_eq!(
            cfg.retry.retryable_errors.len(),
            tfgate_types::DEFAULT_RETRYABLE_ERRORS.len() + 1
        );
    }

    #[test]
    fn replace_defaults_drops_builtin_patterns() {
        let file = parse_config_str(
            Path::new("x.toml"),
            "[retry]\nreplace_defaults = true\n[retry.retryable_errors]\n\"flaky\" = \"Flaky.\"\n",
        )
        .unwrap();
        let cfg = resolve_scenario(&file, None).unwrap();
        assert_eq!(cfg.retry.retryable_errors.len(), 1);
    }

    #[test]
    fn bad_duration_is_reported_with_field() {
        let file = parse_config_str(
            Path::new("x.toml"),
            "[retry]\ntime_between_retries = \"soon\"\n",
        )
        .unwrap();
        let err = resolve_scenario(&file, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { ref field, .. } if field == "retry.time_between_retries"));
    }

    #[test]
    fn empty_outputs_are_rejected() {
        let file =
            parse_config_str(Path::new("x.toml"), "[scenario]\noutputs = []\n").unwrap();
        let err = resolve_scenario(&file, None).unwrap_err();
        assert!(err.to_string().contains("scenario.outputs"));
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let file = parse_config_str(
            Path::new("x.toml"),
            "[scenario]\noutputs = [\"server_id\", \"server_id\"]\n",
        )
        .unwrap();
        let err = resolve_scenario(&file, None).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let file = parse_config_str(
            Path::new("x.toml"),
            "[retry.retryable_errors]\n\"(unclosed\" = \"bad\"\n",
        )
        .unwrap();
        let err = resolve_scenario(&file, None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        let err = load_config_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn env_overrides_apply_when_set() {
        let mut cfg = ScenarioConfig::sftp_default();
        apply_env_overrides(&mut cfg, |key| match key {
            ENV_TERRAFORM_DIR => Some("/srv/modules/sftp".to_string()),
            ENV_TERRAFORM_BINARY => Some("tofu".to_string()),
            _ => None,
        });
        assert_eq!(cfg.terraform_dir, PathBuf::from("/srv/modules/sftp"));
        assert_eq!(cfg.terraform_binary, "tofu");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = ScenarioConfig::sftp_default();
        apply_env_overrides(&mut cfg, |_| Some(String::new()));
        assert_eq!(cfg, ScenarioConfig::sftp_default());
    }
}
