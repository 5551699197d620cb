//! Test fixtures for tfgate.
//!
//! [`FakeTerraform`] is a shell-script stand-in for `terraform`. Tests shape
//! its behaviour through files in the module directory, so nothing touches
//! the process environment:
//! - `outputs/<name>.json`: stdout for `terraform output -json <name>`
//! - `apply_failures` + `apply_error`: fail apply N times with that stderr
//! - `apply_sleep`: seconds apply sleeps before finishing
//! - `destroy_error`: fail every destroy with that stderr
//!
//! Each call is appended to `calls.log`, and `TF_IN_AUTOMATION` plus
//! `TFGATE_PROBE` to `env.log`.
//!
//! Setup helpers panic on I/O failure; the crate only exists for tests.

#![cfg(unix)]

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tfgate_types::ScenarioConfig;

const SCRIPT: &str = r#"#!/bin/sh
echo "$*" >> calls.log
echo "${TF_IN_AUTOMATION:-unset} ${TFGATE_PROBE:-unset}" >> env.log
case "$1" in
  init)
    echo "Terraform has been successfully initialized!"
    ;;
  apply)
    if [ -f apply_sleep ]; then
      sleep "$(cat apply_sleep)"
    fi
    if [ -f apply_failures ]; then
      n=$(cat apply_failures)
      if [ "$n" -gt 0 ]; then
        echo $((n - 1)) > apply_failures
        cat apply_error >&2
        exit 1
      fi
    fi
    echo "Apply complete! Resources: 12 added, 0 changed, 0 destroyed."
    ;;
  output)
    for name; do :; done
    if [ -f "outputs/$name.json" ]; then
      cat "outputs/$name.json"
    else
      echo "Error: Output \"$name\" not found" >&2
      exit 1
    fi
    ;;
  destroy)
    if [ -f destroy_error ]; then
      cat destroy_error >&2
      exit 1
    fi
    echo "Destroy complete! Resources: 12 destroyed."
    ;;
  *)
    echo "unexpected command: $1" >&2
    exit 64
    ;;
esac
"#;

/// Values the SFTP module reports after a good apply, as `output -json` prints them.
pub const SFTP_OUTPUTS: [(&str, &str); 5] = [
    ("server_id", r#""s-0123456789abcdef0""#),
    (
        "server_endpoint",
        r#""s-0123456789abcdef0.server.transfer.eu-west-1.amazonaws.com""#,
    ),
    ("sftp_bucket_name", r#""my-sftp-storage-bucket""#),
    ("sftp_bucket_arn", r#""arn:aws:s3:::my-sftp-storage-bucket""#),
    (
        "user_details",
        r#"[{"home_directory":"user1","username":"user1"}]"#,
    ),
];

/// A temp dir holding `bin/terraform` and the `module/` it runs in.
#[derive(Debug)]
pub struct FakeTerraform {
    root: TempDir,
}

impl FakeTerraform {
    /// A module with no outputs at all.
    pub fn empty() -> Self {
        Self::create().expect("create fake terraform module")
    }

    /// A module whose outputs are all populated.
    pub fn sftp() -> Self {
        let fake = Self::empty();
        for (name, json) in SFTP_OUTPUTS {
            fake.set_output(name, json);
        }
        fake
    }

    fn create() -> io::Result<Self> {
        let root = TempDir::new()?;
        fs::create_dir_all(root.path().join("bin"))?;
        fs::create_dir_all(root.path().join("module").join("outputs"))?;

        let binary = root.path().join("bin").join("terraform");
        fs::write(&binary, SCRIPT)?;
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn binary(&self) -> PathBuf {
        self.root.path().join("bin").join("terraform")
    }

    pub fn module_dir(&self) -> PathBuf {
        self.root.path().join("module")
    }

    /// The built-in SFTP scenario pointed at this fake, with fast retries.
    pub fn scenario(&self) -> ScenarioConfig {
        let mut cfg = ScenarioConfig::sftp_default();
        cfg.terraform_dir = self.module_dir();
        cfg.terraform_binary = self.binary().to_string_lossy().into_owned();
        cfg.retry.time_between_retries = Duration::from_millis(10);
        cfg
    }

    fn write(&self, file: &str, body: &str) {
        let path = self.module_dir().join(file);
        fs::write(&path, body).unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
    }

    pub fn set_output(&self, name: &str, json: &str) {
        self.write(&format!("outputs/{name}.json"), json);
    }

    /// Drop an output so `terraform output` reports it as not found.
    pub fn remove_output(&self, name: &str) {
        let path = self.module_dir().join("outputs").join(format!("{name}.json"));
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => panic!("remove {}: {e}", path.display()),
        }
    }

    pub fn fail_apply(&self, times: u32, stderr: &str) {
        self.write("apply_failures", &times.to_string());
        self.write("apply_error", stderr);
    }

    pub fn slow_apply(&self, seconds: u32) {
        self.write("apply_sleep", &seconds.to_string());
    }

    pub fn fail_destroy(&self, stderr: &str) {
        self.write("destroy_error", stderr);
    }

    fn read_lines(&self, file: &str) -> Vec<String> {
        fs::read_to_string(self.module_dir().join(file))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Subcommand and arguments of every invocation, in order.
    pub fn calls(&self) -> Vec<String> {
        self.read_lines("calls.log")
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or("").to_string())
            .collect()
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.subcommands()
            .iter()
            .filter(|s| s.as_str() == subcommand)
            .count()
    }

    /// `TF_IN_AUTOMATION TFGATE_PROBE` as each invocation saw them.
    pub fn env_lines(&self) -> Vec<String> {
        self.read_lines("env.log")
    }
}
