//! Real SFTP stack run.
//!
//! Needs `terraform` on PATH, cloud credentials, and a checkout of the SFTP
//! module. Cargo runs this from the workspace root, where the built-in
//! relative module path does not resolve, so `TFGATE_TERRAFORM_DIR` is
//! required:
//!
//! ```text
//! TFGATE_TERRAFORM_DIR=/path/to/examples/public-service-managed-endpoint-S3 \
//!     cargo test --test integration sftp_stack -- --ignored --nocapture
//! ```

use tfgate_adapters::{locate_terraform, StdProcessRunner, TerraformCli};
use tfgate_app::{ScenarioUseCase, SystemClock};
use tfgate_config::{apply_process_env_overrides, load_scenario};
use tfgate_types::{TeardownStatus, ToolInfo, SFTP_EXPECTED_OUTPUTS};

#[test]
#[ignore = "provisions real cloud resources"]
fn sftp_public_managed_endpoint_s3() {
    let mut cfg = load_scenario(None).expect("built-in scenario");
    apply_process_env_overrides(&mut cfg);
    assert!(
        cfg.terraform_dir.is_dir(),
        "module dir {} not found; set TFGATE_TERRAFORM_DIR to the SFTP module checkout",
        cfg.terraform_dir.display()
    );
    locate_terraform(&cfg.terraform_binary).expect("terraform on PATH");

    let usecase = ScenarioUseCase::new(
        TerraformCli::new(StdProcessRunner),
        SystemClock,
        ToolInfo {
            name: "tfgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );
    let outcome = usecase.execute(&cfg).expect("scenario runs");
    let receipt = &outcome.receipt;

    assert_eq!(receipt.teardown.status, TeardownStatus::Ok, "{:?}", receipt.teardown);
    assert!(receipt.fatal.is_none(), "{:?}", receipt.fatal);
    for name in SFTP_EXPECTED_OUTPUTS {
        let value = receipt.outputs.get(name).map(String::as_str).unwrap_or("");
        assert!(!value.is_empty(), "{name} should not be empty");
    }
    assert!(outcome.passed(), "{:?}", receipt.verdict.reasons);
}
