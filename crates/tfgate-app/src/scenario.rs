//! ScenarioUseCase - one provisioning cycle with guaranteed teardown.
//!
//! The sequence is fixed:
//! 1. Configure (validate structure, arm the teardown guard)
//! 2. Provision (init, then apply; transient failures retried by the provisioner)
//! 3. Inspect (read each expected output by name; a missing one is fatal)
//! 4. Validate (soft non-empty checks over everything read)
//! 5. Teardown (destroy, exactly once, on every exit path)

use crate::Clock;
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Instant;
pub use tfgate_adapters::CancelFlag;
use tfgate_adapters::{CommandReport, Provisioner};
use tfgate_domain::{compute_verdict, evaluate_outputs};
use tfgate_error::{OutputError, ProvisionError};
use tfgate_types::{
    FatalError, FatalKind, HostInfo, LifecycleStep, RunMeta, ScenarioConfig, ScenarioMeta,
    ScenarioReceipt, StepRecord, StepStatus, TeardownRecord, TeardownStatus, ToolInfo,
    SCENARIO_SCHEMA_V1,
};
use tracing::{error, info, warn};

type ProvisionStep<P> = fn(&P, &ScenarioConfig) -> Result<CommandReport, ProvisionError>;

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub receipt: ScenarioReceipt,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.receipt.passed()
    }

    /// A lifecycle step failed, as opposed to a check.
    pub fn is_fatal(&self) -> bool {
        self.receipt.fatal.is_some()
    }

    pub fn teardown_failed(&self) -> bool {
        self.receipt.teardown.status == TeardownStatus::Error
    }
}

/// Runs destroy exactly once: through [`TeardownGuard::finish`] on the normal
/// path, or from `Drop` when the scope unwinds before reaching it.
pub struct TeardownGuard<'a, P: Provisioner> {
    provisioner: &'a P,
    cfg: &'a ScenarioConfig,
    armed: bool,
}

impl<'a, P: Provisioner> TeardownGuard<'a, P> {
    pub fn arm(provisioner: &'a P, cfg: &'a ScenarioConfig) -> Self {
        Self {
            provisioner,
            cfg,
            armed: true,
        }
    }

    /// Run destroy now and report how it went.
    pub fn finish(mut self) -> (TeardownRecord, StepRecord) {
        self.armed = false;
        destroy(self.provisioner, self.cfg)
    }
}

impl<P: Provisioner> Drop for TeardownGuard<'_, P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        warn!(scenario = %self.cfg.name, "scenario aborted early; destroying provisioned resources");
        let (record, _) = destroy(self.provisioner, self.cfg);
        if let Some(err) = record.error {
            error!(scenario = %self.cfg.name, error = %err, "teardown after abort failed");
        }
    }
}

fn destroy<P: Provisioner>(provisioner: &P, cfg: &ScenarioConfig) -> (TeardownRecord, StepRecord) {
    let started = Instant::now();
    match provisioner.destroy(cfg) {
        Ok(report) => (
            TeardownRecord {
                attempted: true,
                status: TeardownStatus::Ok,
                error: None,
            },
            ok_step(LifecycleStep::Destroy, None, &report),
        ),
        Err(err) => {
            error!(scenario = %cfg.name, error = %err, "terraform destroy failed; resources may be left behind");
            (
                TeardownRecord {
                    attempted: true,
                    status: TeardownStatus::Error,
                    error: Some(err.to_string()),
                },
                provision_error_step(LifecycleStep::Destroy, &err, started),
            )
        }
    }
}

fn ok_step(step: LifecycleStep, name: Option<&str>, report: &CommandReport) -> StepRecord {
    StepRecord {
        step,
        name: name.map(str::to_string),
        attempts: report.attempts,
        wall_ms: report.wall_ms,
        status: StepStatus::Ok,
        error: None,
    }
}

fn provision_error_step(step: LifecycleStep, err: &ProvisionError, started: Instant) -> StepRecord {
    StepRecord {
        step,
        name: None,
        attempts: err.attempts(),
        wall_ms: started.elapsed().as_millis() as u64,
        status: StepStatus::Error,
        error: Some(err.to_string()),
    }
}

fn output_step(name: &str, started: Instant, err: Option<&OutputError>) -> StepRecord {
    StepRecord {
        step: LifecycleStep::Output,
        name: Some(name.to_string()),
        attempts: 1,
        wall_ms: started.elapsed().as_millis() as u64,
        status: if err.is_some() {
            StepStatus::Error
        } else {
            StepStatus::Ok
        },
        error: err.map(ToString::to_string),
    }
}

pub struct ScenarioUseCase<P: Provisioner, C: Clock> {
    provisioner: P,
    clock: C,
    tool: ToolInfo,
    cancel: Option<CancelFlag>,
}

impl<P: Provisioner, C: Clock> ScenarioUseCase<P, C> {
    pub fn new(provisioner: P, clock: C, tool: ToolInfo) -> Self {
        Self {
            provisioner,
            clock,
            tool,
            cancel: None,
        }
    }

    /// Stop between steps once `flag` is set; teardown still runs.
    ///
    /// Hand the same flag to the provisioner so it stops retrying too.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run the scenario.
    ///
    /// Only structural configuration problems return `Err`; those are caught
    /// before anything is provisioned. Every lifecycle failure is recorded in
    /// the receipt instead, after teardown has run.
    pub fn execute(&self, cfg: &ScenarioConfig) -> anyhow::Result<ScenarioOutcome> {
        tfgate_config::validate_scenario(cfg)
            .with_context(|| format!("invalid scenario {:?}", cfg.name))?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = self.clock.now_rfc3339();
        info!(
            scenario = %cfg.name,
            run_id = %run_id,
            dir = %cfg.terraform_dir.display(),
            variables = cfg.vars.len(),
            "starting scenario"
        );

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut outputs: BTreeMap<String, String> = BTreeMap::new();
        let mut fatal: Option<FatalError> = None;

        let guard = TeardownGuard::arm(&self.provisioner, cfg);

        let provision: [(LifecycleStep, ProvisionStep<P>); 2] = [
            (LifecycleStep::Init, P::init),
            (LifecycleStep::Apply, P::apply),
        ];
        for (step, op) in provision {
            if let Some(f) = self.interrupted() {
                fatal = Some(f);
                break;
            }
            let started = Instant::now();
            match op(&self.provisioner, cfg) {
                Ok(report) => steps.push(ok_step(step, None, &report)),
                Err(err) if err.is_interrupted() => {
                    steps.push(provision_error_step(step, &err, started));
                    fatal = Some(interrupt_fatal());
                    break;
                }
                Err(err) => {
                    error!(step = step.as_str(), error = %err, "provisioning failed");
                    steps.push(provision_error_step(step, &err, started));
                    fatal = Some(FatalError {
                        kind: FatalKind::Provision,
                        message: err.to_string(),
                    });
                    break;
                }
            }
        }

        if fatal.is_none() {
            for name in &cfg.expected_outputs {
                if let Some(f) = self.interrupted() {
                    fatal = Some(f);
                    break;
                }
                let started = Instant::now();
                match self.provisioner.output(cfg, name) {
                    Ok(value) => {
                        info!(output = %name, bytes = value.len(), "read output");
                        steps.push(output_step(name, started, None));
                        outputs.insert(name.clone(), value);
                    }
                    Err(err) => {
                        error!(output = %name, error = %err, "could not read output");
                        steps.push(output_step(name, started, Some(&err)));
                        fatal = Some(FatalError {
                            kind: if err.is_missing() {
                                FatalKind::MissingOutput
                            } else {
                                FatalKind::Unexpected
                            },
                            message: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        let checks = if fatal.is_none() {
            evaluate_outputs(&cfg.expected_outputs, &outputs)
        } else {
            Vec::new()
        };
        for check in checks.iter().filter(|c| c.status == tfgate_types::CheckStatus::Fail) {
            warn!(output = %check.output, "{}", check.message);
        }

        let (teardown, destroy_step) = guard.finish();
        steps.push(destroy_step);

        let verdict = compute_verdict(&checks, fatal.as_ref(), &teardown);
        let ended_at = self.clock.now_rfc3339();

        info!(
            scenario = %cfg.name,
            status = ?verdict.status,
            pass = verdict.counts.pass,
            fail = verdict.counts.fail,
            "scenario finished"
        );

        let receipt = ScenarioReceipt {
            schema: SCENARIO_SCHEMA_V1.to_string(),
            tool: self.tool.clone(),
            run: RunMeta {
                id: run_id,
                started_at,
                ended_at,
                host: HostInfo {
                    os: std::env::consts::OS.to_string(),
                    arch: std::env::consts::ARCH.to_string(),
                },
            },
            scenario: ScenarioMeta {
                name: cfg.name.clone(),
                terraform_dir: cfg.terraform_dir.to_string_lossy().into_owned(),
                variables: cfg.vars.keys().cloned().collect(),
                expected_outputs: cfg.expected_outputs.clone(),
            },
            steps,
            outputs,
            checks,
            fatal,
            teardown,
            verdict,
        };

        Ok(ScenarioOutcome { receipt })
    }

    fn interrupted(&self) -> Option<FatalError> {
        self.cancelled().then(interrupt_fatal)
    }
}

fn interrupt_fatal() -> FatalError {
    warn!("interrupt received; skipping to teardown");
    FatalError {
        kind: FatalKind::Unexpected,
        message: "interrupted".to_string(),
    }
}
