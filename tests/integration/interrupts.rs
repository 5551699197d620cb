//! Interrupts that land while Terraform is running.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tfgate_adapters::{
    AdapterError, CancelFlag, CommandSpec, ProcessRunner, RunResult, StdProcessRunner,
    TerraformCli,
};
use tfgate_app::{ScenarioUseCase, SystemClock};
use tfgate_fake::FakeTerraform;
use tfgate_types::{FatalKind, LifecycleStep, StepStatus, TeardownStatus, ToolInfo};

/// Delivers the interrupt while `apply` runs, as Ctrl-C would.
struct InterruptDuringApply {
    flag: CancelFlag,
}

impl ProcessRunner for InterruptDuringApply {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult, AdapterError> {
        if spec.argv.get(1).map(String::as_str) == Some("apply") {
            self.flag.store(true, Ordering::SeqCst);
        }
        StdProcessRunner.run(spec)
    }
}

#[test]
fn interrupted_apply_is_not_retried_and_still_destroys() {
    let fake = FakeTerraform::sftp();
    fake.fail_apply(
        4,
        "Interrupt received.\nError: rpc error: code = Unavailable desc = transport is closing\n",
    );
    let mut cfg = fake.scenario();
    cfg.retry.time_between_retries = Duration::from_secs(30);

    let flag = CancelFlag::default();
    let provisioner = TerraformCli::new(InterruptDuringApply { flag: flag.clone() })
        .with_cancel(flag.clone());
    let usecase = ScenarioUseCase::new(
        provisioner,
        SystemClock,
        ToolInfo {
            name: "tfgate".to_string(),
            version: "test".to_string(),
        },
    )
    .with_cancel(flag);

    let started = Instant::now();
    let outcome = usecase.execute(&cfg).expect("scenario config is valid");
    let receipt = &outcome.receipt;

    assert_eq!(fake.count("apply"), 1, "calls: {:?}", fake.calls());
    assert_eq!(fake.count("output"), 0);
    assert_eq!(fake.count("destroy"), 1);
    assert!(started.elapsed() < Duration::from_secs(10));

    let fatal = receipt.fatal.as_ref().expect("fatal error recorded");
    assert_eq!(fatal.kind, FatalKind::Unexpected);
    assert_eq!(fatal.message, "interrupted");
    assert_eq!(receipt.teardown.status, TeardownStatus::Ok);

    let apply = receipt
        .steps
        .iter()
        .find(|s| s.step == LifecycleStep::Apply)
        .expect("apply step recorded");
    assert_eq!(apply.status, StepStatus::Error);
    assert_eq!(apply.attempts, 1);
}
