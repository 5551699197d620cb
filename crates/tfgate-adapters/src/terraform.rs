//! Terraform CLI provisioner.
//!
//! Every lifecycle call is a blocking `terraform` subprocess in the module
//! directory. Init, apply and destroy retry on known-transient failures;
//! output reads never retry.

use crate::{CommandSpec, ProcessRunner, RunResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tfgate_domain::RetryMatcher;
use tfgate_error::{stderr_tail, OutputError, ProvisionError};
use tfgate_types::{LifecycleStep, ScenarioConfig};
use tracing::{debug, info, warn};

/// Captured bytes per stream per command.
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// How often a retry backoff looks at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Shared flag set by an interrupt handler.
pub type CancelFlag = Arc<AtomicBool>;

static MISSING_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)output .* not found|could not be found|no outputs found")
        .expect("static regex is valid")
});

/// Result of a lifecycle command that eventually succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub attempts: u32,
    pub wall_ms: u64,
}

/// The external provisioning engine, as seen by the scenario runner.
pub trait Provisioner {
    fn init(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError>;

    fn apply(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError>;

    /// Read one named output from state.
    fn output(&self, cfg: &ScenarioConfig, name: &str) -> Result<String, OutputError>;

    fn destroy(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError>;

    fn init_and_apply(
        &self,
        cfg: &ScenarioConfig,
    ) -> Result<(CommandReport, CommandReport), ProvisionError> {
        let init = self.init(cfg)?;
        let apply = self.apply(cfg)?;
        Ok((init, apply))
    }
}

impl<P: Provisioner + ?Sized> Provisioner for &P {
    fn init(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError> {
        (**self).init(cfg)
    }

    fn apply(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError> {
        (**self).apply(cfg)
    }

    fn output(&self, cfg: &ScenarioConfig, name: &str) -> Result<String, OutputError> {
        (**self).output(cfg, name)
    }

    fn destroy(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError> {
        (**self).destroy(cfg)
    }
}

/// Resolve the Terraform executable up front so a missing binary fails
/// before anything is provisioned.
pub fn locate_terraform(binary: &str) -> Result<PathBuf, ProvisionError> {
    let path = Path::new(binary);
    if path.components().count() > 1 {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ProvisionError::BinaryNotFound {
                binary: binary.to_string(),
                reason: "no such file".to_string(),
            })
        };
    }

    which::which(binary).map_err(|e| ProvisionError::BinaryNotFound {
        binary: binary.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct TerraformCli<R: ProcessRunner> {
    runner: R,
    output_cap_bytes: usize,
    cancel: Option<CancelFlag>,
}

impl<R: ProcessRunner> TerraformCli<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            cancel: None,
        }
    }

    /// Stop retrying init and apply once `flag` is set.
    ///
    /// Destroy ignores the flag: it is what an interrupted run still owes.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Sleep for `total`, waking early when an interruptible step is cancelled.
    fn backoff(&self, interruptible: bool, total: Duration) {
        let deadline = Instant::now() + total;
        loop {
            let now = Instant::now();
            if now >= deadline || (interruptible && self.cancelled()) {
                return;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }

    fn spec(&self, cfg: &ScenarioConfig, args: Vec<String>) -> CommandSpec {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(cfg.terraform_binary.clone());
        argv.extend(args);

        let mut env = vec![("TF_IN_AUTOMATION".to_string(), "1".to_string())];
        env.extend(cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        CommandSpec {
            argv,
            cwd: Some(cfg.terraform_dir.clone()),
            env,
            timeout: cfg.command_timeout,
            output_cap_bytes: self.output_cap_bytes,
        }
    }

    fn run_lifecycle(
        &self,
        step: LifecycleStep,
        cfg: &ScenarioConfig,
        args: Vec<String>,
    ) -> Result<CommandReport, ProvisionError> {
        let name = step.as_str();
        let matcher = RetryMatcher::new(&cfg.retry.retryable_errors).map_err(|e| {
            ProvisionError::InvalidRetryPolicy {
                reason: e.to_string(),
            }
        })?;
        let max_attempts = cfg.retry.max_retries.saturating_add(1);
        let interruptible = step != LifecycleStep::Destroy;
        let spec = self.spec(cfg, args);
        let started = Instant::now();

        let mut attempt = 0;
        loop {
            if interruptible && self.cancelled() {
                warn!(step = name, attempts = attempt, "terraform {name} interrupted");
                return Err(ProvisionError::Interrupted {
                    step: name,
                    attempts: attempt,
                });
            }
            attempt += 1;
            info!(step = name, attempt, dir = %cfg.terraform_dir.display(), "running terraform {name}");
            debug!(command = %spec.display(), "terraform command line");

            let run = self
                .runner
                .run(&spec)
                .map_err(|e| ProvisionError::Spawn {
                    step: name,
                    message: e.to_string(),
                })?;

            if run.timed_out {
                return Err(ProvisionError::TimedOut {
                    step: name,
                    attempt,
                });
            }

            if run.success() {
                let wall_ms = started.elapsed().as_millis() as u64;
                info!(step = name, attempt, wall_ms, "terraform {name} succeeded");
                return Ok(CommandReport {
                    attempts: attempt,
                    wall_ms,
                });
            }

            let detail = failure_detail(&run);
            let combined = format!("{}\n{}", run.stdout_lossy(), run.stderr_lossy());

            match matcher.matches(&combined) {
                None => {
                    return Err(ProvisionError::Failed {
                        step: name,
                        exit_code: run.exit_code,
                        attempt,
                        stderr: detail,
                    });
                }
                Some(_) if attempt >= max_attempts => {
                    return Err(ProvisionError::RetriesExhausted {
                        step: name,
                        attempts: attempt,
                        last_error: detail,
                    });
                }
                Some(reason) => {
                    warn!(
                        step = name,
                        attempt,
                        max_attempts,
                        reason,
                        sleep = ?cfg.retry.time_between_retries,
                        "terraform {name} hit a retryable error"
                    );
                    self.backoff(interruptible, cfg.retry.time_between_retries);
                }
            }
        }
    }
}

fn failure_detail(run: &RunResult) -> String {
    let stderr = stderr_tail(&run.stderr_lossy());
    if stderr.is_empty() {
        stderr_tail(&run.stdout_lossy())
    } else {
        stderr
    }
}

fn common_flags(cfg: &ScenarioConfig, args: &mut Vec<String>) {
    if !cfg.lock {
        args.push("-lock=false".to_string());
    }
    if cfg.no_color {
        args.push("-no-color".to_string());
    }
}

pub(crate) fn init_args(cfg: &ScenarioConfig) -> Vec<String> {
    let mut args = vec![
        "init".to_string(),
        "-upgrade=false".to_string(),
        "-input=false".to_string(),
    ];
    if cfg.no_color {
        args.push("-no-color".to_string());
    }
    args
}

pub(crate) fn apply_args(cfg: &ScenarioConfig) -> Vec<String> {
    let mut args = vec![
        "apply".to_string(),
        "-input=false".to_string(),
        "-auto-approve".to_string(),
    ];
    common_flags(cfg, &mut args);
    args.extend(cfg.var_args());
    args
}

pub(crate) fn destroy_args(cfg: &ScenarioConfig) -> Vec<String> {
    let mut args = vec![
        "destroy".to_string(),
        "-auto-approve".to_string(),
        "-input=false".to_string(),
    ];
    common_flags(cfg, &mut args);
    args.extend(cfg.var_args());
    args
}

pub(crate) fn output_args(cfg: &ScenarioConfig, name: &str) -> Vec<String> {
    let mut args = vec!["output".to_string()];
    if cfg.no_color {
        args.push("-no-color".to_string());
    }
    args.push("-json".to_string());
    args.push(name.to_string());
    args
}

/// Turn `terraform output -json <name>` stdout into the value string.
///
/// Strings come back unquoted, `null` as empty, anything else as compact JSON.
pub(crate) fn parse_output_value(name: &str, stdout: &str) -> Result<String, OutputError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(OutputError::Missing {
            name: name.to_string(),
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| OutputError::Parse {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl<R: ProcessRunner> Provisioner for TerraformCli<R> {
    fn init(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError> {
        self.run_lifecycle(LifecycleStep::Init, cfg, init_args(cfg))
    }

    fn apply(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError> {
        self.run_lifecycle(LifecycleStep::Apply, cfg, apply_args(cfg))
    }

    fn output(&self, cfg: &ScenarioConfig, name: &str) -> Result<String, OutputError> {
        let spec = self.spec(cfg, output_args(cfg, name));
        debug!(output = name, command = %spec.display(), "reading terraform output");

        let run = self.runner.run(&spec).map_err(|e| OutputError::Spawn {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        if run.timed_out {
            return Err(OutputError::Spawn {
                name: name.to_string(),
                message: "timed out".to_string(),
            });
        }

        if run.exit_code != 0 {
            let combined = format!("{}\n{}", run.stdout_lossy(), run.stderr_lossy());
            if MISSING_OUTPUT.is_match(&combined) {
                return Err(OutputError::Missing {
                    name: name.to_string(),
                });
            }
            return Err(OutputError::Command {
                name: name.to_string(),
                exit_code: run.exit_code,
                stderr: failure_detail(&run),
            });
        }

        parse_output_value(name, &run.stdout_lossy())
    }

    fn destroy(&self, cfg: &ScenarioConfig) -> Result<CommandReport, ProvisionError> {
        self.run_lifecycle(LifecycleStep::Destroy, cfg, destroy_args(cfg))
    }
}
