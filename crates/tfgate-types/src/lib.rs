//! Shared types for tfgate.
//!
//! Design goal: versioned, explicit, boring.
//! Scenario configuration lives here next to the receipts a run produces, so
//! every crate agrees on what a scenario and its result look like.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const SCENARIO_SCHEMA_V1: &str = "tfgate.scenario.v1";
pub const CONFIG_SCHEMA_V1: &str = "tfgate.config.v1";

/// Module path used by the built-in SFTP scenario.
///
/// Relative to the directory tfgate runs in, which for the module's own repo
/// is its `test/` directory. Anywhere else, set `TFGATE_TERRAFORM_DIR` or
/// `scenario.terraform_dir`.
pub const DEFAULT_SFTP_MODULE_DIR: &str = "../examples/public-service-managed-endpoint-S3";

pub const DEFAULT_SFTP_SCENARIO_NAME: &str = "sftp-public-managed-endpoint-s3";

/// Outputs the SFTP module exposes after a successful apply.
pub const SFTP_EXPECTED_OUTPUTS: [&str; 5] = [
    "server_id",
    "server_endpoint",
    "sftp_bucket_name",
    "sftp_bucket_arn",
    "user_details",
];

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIME_BETWEEN_RETRIES: Duration = Duration::from_secs(5);

/// Transient Terraform failures worth retrying, as `(regex, description)`.
pub const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    (
        ".*read: connection reset by peer.*",
        "Failed to reach helm charts repository.",
    ),
    (".*transport is closing.*", "Failed to reach Kubernetes API."),
    (
        ".*unable to verify signature.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*unable to verify checksum.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*no provider exists with the given name.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*registry service is unreachable.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Error installing provider.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Failed to query available provider packages.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*timeout while waiting for plugin to start.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*timed out waiting for server handshake.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        "could not query provider registry for",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Provider produced inconsistent result after apply.*",
        "Provider eventual consistency error.",
    ),
];

// ----------------------------
// Input variables
// ----------------------------

/// A Terraform input variable value.
///
/// Deserialized untagged, so TOML and JSON literals map onto it directly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<VarValue>),
    Map(BTreeMap<String, VarValue>),
}

impl VarValue {
    /// Render as the value half of a `-var name=value` argument.
    ///
    /// Top-level strings go through raw; everything nested is HCL syntax.
    pub fn render_hcl(&self) -> String {
        match self {
            VarValue::String(s) => s.clone(),
            other => other.render_nested(),
        }
    }

    fn render_nested(&self) -> String {
        match self {
            VarValue::Bool(b) => b.to_string(),
            VarValue::Int(i) => i.to_string(),
            VarValue::Float(f) => f.to_string(),
            VarValue::String(s) => quote_hcl(s),
            VarValue::List(items) => {
                let parts: Vec<String> = items.iter().map(VarValue::render_nested).collect();
                format!("[{}]", parts.join(", "))
            }
            VarValue::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{} = {}", quote_hcl(k), v.render_nested()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }
}

fn quote_hcl(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Template sequences would otherwise be interpolated.
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::String(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::String(s)
    }
}

impl From<bool> for VarValue {
    fn from(b: bool) -> Self {
        VarValue::Bool(b)
    }
}

impl From<i64> for VarValue {
    fn from(i: i64) -> Self {
        VarValue::Int(i)
    }
}

impl<T: Into<VarValue>> From<Vec<T>> for VarValue {
    fn from(items: Vec<T>) -> Self {
        VarValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, String>> for VarValue {
    fn from(map: BTreeMap<String, String>) -> Self {
        VarValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

// ----------------------------
// SFTP scenario inputs
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SftpUser {
    pub username: String,
    pub home_directory: String,
}

impl From<SftpUser> for VarValue {
    fn from(user: SftpUser) -> Self {
        let mut map = BTreeMap::new();
        map.insert("username".to_string(), VarValue::String(user.username));
        map.insert(
            "home_directory".to_string(),
            VarValue::String(user.home_directory),
        );
        VarValue::Map(map)
    }
}

/// Typed view of the SFTP module's input variables.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct SftpScenarioVars {
    pub environment: String,
    pub server_name: String,
    pub enable_logging: bool,
    pub create_new_bucket: bool,
    pub s3_bucket_name: String,
    pub users: Vec<SftpUser>,
    pub secrets_prefix: String,
    pub tags: BTreeMap<String, String>,
}

impl Default for SftpScenarioVars {
    fn default() -> Self {
        let users = ["user1", "user2"]
            .into_iter()
            .map(|name| SftpUser {
                username: name.to_string(),
                home_directory: name.to_string(),
            })
            .collect();

        let tags = [
            ("Environment", "dev"),
            ("Project", "sftp-demo"),
            ("Terraform", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            environment: "dev".to_string(),
            server_name: "my-sftp-server".to_string(),
            enable_logging: true,
            create_new_bucket: true,
            s3_bucket_name: "my-sftp-storage-bucket".to_string(),
            users,
            secrets_prefix: "dev/sftp".to_string(),
            tags,
        }
    }
}

impl SftpScenarioVars {
    pub fn into_vars(self) -> BTreeMap<String, VarValue> {
        let mut vars = BTreeMap::new();
        vars.insert("environment".to_string(), self.environment.into());
        vars.insert("server_name".to_string(), self.server_name.into());
        vars.insert("enable_logging".to_string(), self.enable_logging.into());
        vars.insert(
            "create_new_bucket".to_string(),
            self.create_new_bucket.into(),
        );
        vars.insert("s3_bucket_name".to_string(), self.s3_bucket_name.into());
        vars.insert("users".to_string(), self.users.into());
        vars.insert("secrets_prefix".to_string(), self.secrets_prefix.into());
        vars.insert("tags".to_string(), self.tags.into());
        vars
    }
}

// ----------------------------
// Scenario configuration
// ----------------------------

/// When and how often to retry a lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub time_between_retries: Duration,

    /// Regex pattern to human-readable description.
    pub retryable_errors: BTreeMap<String, String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            time_between_retries: DEFAULT_TIME_BETWEEN_RETRIES,
            retryable_errors: DEFAULT_RETRYABLE_ERRORS
                .iter()
                .map(|(p, d)| (p.to_string(), d.to_string()))
                .collect(),
        }
    }
}

/// Everything needed to drive one provisioning scenario.
///
/// Built once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,

    /// Module reference: the directory Terraform runs in.
    pub terraform_dir: PathBuf,

    /// Terraform executable (name on PATH or explicit path).
    pub terraform_binary: String,

    pub vars: BTreeMap<String, VarValue>,

    /// Outputs to inspect, in order.
    pub expected_outputs: Vec<String>,

    pub env: BTreeMap<String, String>,
    pub retry: RetryPolicy,

    /// Take the state lock during apply/destroy.
    pub lock: bool,

    pub no_color: bool,

    /// Per-command timeout. `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
}

impl ScenarioConfig {
    /// The built-in SFTP scenario with its literal inputs.
    pub fn sftp_default() -> Self {
        Self {
            name: DEFAULT_SFTP_SCENARIO_NAME.to_string(),
            terraform_dir: PathBuf::from(DEFAULT_SFTP_MODULE_DIR),
            terraform_binary: "terraform".to_string(),
            vars: SftpScenarioVars::default().into_vars(),
            expected_outputs: SFTP_EXPECTED_OUTPUTS.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            retry: RetryPolicy::default(),
            lock: false,
            no_color: true,
            command_timeout: None,
        }
    }

    /// `-var name=value` pairs in variable-name order.
    pub fn var_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.vars.len() * 2);
        for (name, value) in &self.vars {
            args.push("-var".to_string());
            args.push(format!("{name}={}", value.render_hcl()));
        }
        args
    }
}

// ----------------------------
// Config file contract
// ----------------------------

/// On-disk `tfgate.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub scenario: ScenarioSection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySection>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, VarValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_binary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_color: Option<bool>,

    /// Per-command timeout (e.g. "30m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Pause between attempts (e.g. "5s").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_between_retries: Option<String>,

    /// Extra patterns, merged over the defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retryable_errors: BTreeMap<String, String>,

    /// Drop the default pattern table before merging.
    #[serde(default)]
    pub replace_defaults: bool,
}

// ----------------------------
// Receipts
// ----------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RunMeta {
    pub id: String,
    pub started_at: String,
    pub ended_at: String,
    pub host: HostInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ScenarioMeta {
    pub name: String,
    pub terraform_dir: String,

    /// Variable names only; values may carry secrets.
    pub variables: Vec<String>,

    pub expected_outputs: Vec<String>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStep {
    Init,
    Apply,
    Output,
    Destroy,
}

impl LifecycleStep {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStep::Init => "init",
            LifecycleStep::Apply => "apply",
            LifecycleStep::Output => "output",
            LifecycleStep::Destroy => "destroy",
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct StepRecord {
    pub step: LifecycleStep,

    /// Output name, for `output` steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub attempts: u32,
    pub wall_ms: u64,
    pub status: StepStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// One soft assertion over a retrieved output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CheckResult {
    pub output: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    Provision,
    MissingOutput,
    Unexpected,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct FatalError {
    pub kind: FatalKind,
    pub message: String,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct TeardownRecord {
    pub attempted: bool,
    pub status: TeardownStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub struct VerdictCounts {
    pub pass: u32,
    pub fail: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub counts: VerdictCounts,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ScenarioReceipt {
    pub schema: String,
    pub tool: ToolInfo,
    pub run: RunMeta,
    pub scenario: ScenarioMeta,
    pub steps: Vec<StepRecord>,
    pub outputs: BTreeMap<String, String>,
    pub checks: Vec<CheckResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<FatalError>,

    pub teardown: TeardownRecord,
    pub verdict: Verdict,
}

impl ScenarioReceipt {
    pub fn passed(&self) -> bool {
        self.verdict.status == VerdictStatus::Pass
    }

    /// Failed checks only, in evaluation order.
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
    }
}
