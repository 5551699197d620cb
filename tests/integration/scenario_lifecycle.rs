//! Full scenario lifecycle through `StdProcessRunner` and `TerraformCli`.

use std::time::Duration;
use tfgate_adapters::{StdProcessRunner, TerraformCli};
use tfgate_app::{ScenarioOutcome, ScenarioUseCase, SystemClock};
use tfgate_fake::FakeTerraform;
use tfgate_types::{
    FatalKind, ScenarioConfig, TeardownStatus, ToolInfo, VerdictStatus, SFTP_EXPECTED_OUTPUTS,
};

fn tool() -> ToolInfo {
    ToolInfo {
        name: "tfgate".to_string(),
        version: "test".to_string(),
    }
}

fn execute(cfg: &ScenarioConfig) -> ScenarioOutcome {
    ScenarioUseCase::new(TerraformCli::new(StdProcessRunner), SystemClock, tool())
        .execute(cfg)
        .expect("scenario config is valid")
}

#[test]
fn sftp_scenario_passes_end_to_end() {
    let fake = FakeTerraform::sftp();
    let outcome = execute(&fake.scenario());

    assert!(outcome.passed(), "reasons: {:?}", outcome.receipt.verdict.reasons);
    for name in SFTP_EXPECTED_OUTPUTS {
        let value = &outcome.receipt.outputs[name];
        assert!(!value.is_empty(), "{name} should not be empty");
    }
    assert_eq!(
        outcome.receipt.outputs["user_details"],
        r#"[{"home_directory":"user1","username":"user1"}]"#
    );
    assert_eq!(fake.count("destroy"), 1);
}

#[test]
fn every_command_runs_in_automation_mode() {
    let fake = FakeTerraform::sftp();
    let mut cfg = fake.scenario();
    cfg.env.insert("TFGATE_PROBE".to_string(), "yes".to_string());

    execute(&cfg);

    let env = fake.env_lines();
    assert_eq!(env.len(), fake.calls().len());
    assert!(env.iter().all(|line| line == "1 yes"), "got {env:?}");
}

#[test]
fn command_timeout_is_fatal_and_still_destroys() {
    let fake = FakeTerraform::sftp();
    fake.slow_apply(3);
    let mut cfg = fake.scenario();
    cfg.command_timeout = Some(Duration::from_millis(200));

    let outcome = execute(&cfg);

    let fatal = outcome.receipt.fatal.as_ref().expect("timeout is fatal");
    assert_eq!(fatal.kind, FatalKind::Provision);
    assert!(fatal.message.contains("timed out"), "got {}", fatal.message);
    assert_eq!(fake.count("output"), 0);
    assert_eq!(fake.count("destroy"), 1);
}

#[test]
fn exhausted_retries_fail_with_attempt_count() {
    let fake = FakeTerraform::sftp();
    fake.fail_apply(99, "Error: timeout while waiting for plugin to start");
    let mut cfg = fake.scenario();
    cfg.retry.max_retries = 2;

    let outcome = execute(&cfg);

    assert_eq!(fake.count("apply"), 3);
    let apply = &outcome.receipt.steps[1];
    assert_eq!(apply.attempts, 3);
    assert_eq!(outcome.receipt.verdict.status, VerdictStatus::Fail);
    assert_eq!(fake.count("destroy"), 1);
}

#[test]
fn renamed_output_is_a_missing_output() {
    let fake = FakeTerraform::sftp();
    fake.remove_output("server_endpoint");
    fake.set_output("endpoint", r#""host""#);

    let outcome = execute(&fake.scenario());

    let fatal = outcome.receipt.fatal.as_ref().unwrap();
    assert_eq!(fatal.kind, FatalKind::MissingOutput);
    assert!(fatal.message.contains("server_endpoint"));
    assert!(outcome.receipt.checks.is_empty());
    assert_eq!(fake.count("output"), 2);
    assert_eq!(fake.count("destroy"), 1);
}

#[test]
fn destroy_failure_is_reported_after_a_clean_run() {
    let fake = FakeTerraform::sftp();
    fake.fail_destroy("Error: deleting S3 Bucket (my-sftp-storage-bucket): BucketNotEmpty");

    let outcome = execute(&fake.scenario());

    assert_eq!(outcome.receipt.teardown.status, TeardownStatus::Error);
    assert!(
        outcome
            .receipt
            .teardown
            .error
            .as_deref()
            .unwrap()
            .contains("BucketNotEmpty")
    );
    assert_eq!(outcome.receipt.verdict.counts.fail, 0);
    assert!(!outcome.passed());
}

#[test]
fn invalid_retry_pattern_is_rejected_before_terraform_runs() {
    let fake = FakeTerraform::sftp();
    let mut cfg = fake.scenario();
    cfg.retry
        .retryable_errors
        .insert("(unclosed".to_string(), "broken".to_string());

    let result =
        ScenarioUseCase::new(TerraformCli::new(StdProcessRunner), SystemClock, tool()).execute(&cfg);

    assert!(result.is_err());
    assert!(fake.calls().is_empty());
}
