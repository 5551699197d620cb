//! Unified error types for tfgate.
//!
//! Library crates return these typed errors; the app layer and CLI wrap them
//! in `anyhow` with context.

use std::path::PathBuf;

/// Number of trailing stderr lines kept in error messages.
pub const STDERR_TAIL_LINES: usize = 20;

/// Errors raised while loading or checking scenario configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid duration for '{field}': {value}")]
    InvalidDuration { field: String, value: String },

    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid retryable error pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to serialize config: {reason}")]
    Serialize { reason: String },
}

/// Errors from the init, apply, and destroy lifecycle commands.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("terraform binary {binary:?} not found: {reason}")]
    BinaryNotFound { binary: String, reason: String },

    #[error("failed to run terraform {step}: {message}")]
    Spawn { step: &'static str, message: String },

    #[error("invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },

    #[error("terraform {step} timed out on attempt {attempt}")]
    TimedOut { step: &'static str, attempt: u32 },

    #[error("terraform {step} failed with exit code {exit_code} on attempt {attempt}: {stderr}")]
    Failed {
        step: &'static str,
        exit_code: i32,
        attempt: u32,
        stderr: String,
    },

    #[error("terraform {step} still failing after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        step: &'static str,
        attempts: u32,
        last_error: String,
    },

    #[error("terraform {step} interrupted after {attempts} attempt(s)")]
    Interrupted { step: &'static str, attempts: u32 },
}

impl ProvisionError {
    /// The lifecycle step that failed.
    pub fn step(&self) -> &'static str {
        match self {
            ProvisionError::BinaryNotFound { .. } | ProvisionError::InvalidRetryPolicy { .. } => {
                "init"
            }
            ProvisionError::Spawn { step, .. }
            | ProvisionError::TimedOut { step, .. }
            | ProvisionError::Failed { step, .. }
            | ProvisionError::RetriesExhausted { step, .. }
            | ProvisionError::Interrupted { step, .. } => *step,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ProvisionError::Interrupted { .. })
    }

    /// Attempts made before giving up; zero when nothing was run.
    pub fn attempts(&self) -> u32 {
        match self {
            ProvisionError::BinaryNotFound { .. }
            | ProvisionError::InvalidRetryPolicy { .. }
            | ProvisionError::Spawn { .. } => 0,
            ProvisionError::TimedOut { attempt, .. } | ProvisionError::Failed { attempt, .. } => {
                *attempt
            }
            ProvisionError::RetriesExhausted { attempts, .. }
            | ProvisionError::Interrupted { attempts, .. } => *attempts,
        }
    }
}

/// Errors from reading a single named output.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output {name:?} not found in terraform state")]
    Missing { name: String },

    #[error("failed to run terraform output {name:?}: {message}")]
    Spawn { name: String, message: String },

    #[error("terraform output {name:?} failed with exit code {exit_code}: {stderr}")]
    Command {
        name: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("terraform output {name:?} returned invalid JSON: {reason}")]
    Parse { name: String, reason: String },
}

impl OutputError {
    pub fn is_missing(&self) -> bool {
        matches!(self, OutputError::Missing { .. })
    }
}

/// Keep the last [`STDERR_TAIL_LINES`] non-blank lines of a command's stderr.
///
/// Terraform prints long diagnostics; the tail carries the actual error.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
