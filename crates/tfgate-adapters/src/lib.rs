//! Std adapters for tfgate.
//!
//! In clean-arch terms: this is where we touch the world. Terraform is only
//! ever reached through [`ProcessRunner`], so everything above can be tested
//! with a scripted runner.

use anyhow::Context;
use std::path::PathBuf;
use std::time::{Duration, Instant};

mod terraform;

pub use terraform::{
    locate_terraform, CancelFlag, CommandReport, Provisioner, TerraformCli,
    DEFAULT_OUTPUT_CAP_BYTES,
};

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,

    /// Max bytes kept per stream. The tail is kept; Terraform reports errors last.
    pub output_cap_bytes: usize,
}

impl CommandSpec {
    /// Shell-quoted command line, for logs.
    pub fn display(&self) -> String {
        shell_words::join(&self.argv)
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub wall_ms: u64,
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("command argv must not be empty")]
    EmptyArgv,

    #[error("timeout is not supported on this platform")]
    TimeoutUnsupported,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult, AdapterError>;
}

impl<P: ProcessRunner + ?Sized> ProcessRunner for &P {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult, AdapterError> {
        (**self).run(spec)
    }
}

#[derive(Debug, Default, Clone)]
pub struct StdProcessRunner;

impl ProcessRunner for StdProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult, AdapterError> {
        if spec.argv.is_empty() {
            return Err(AdapterError::EmptyArgv);
        }

        #[cfg(unix)]
        {
            return run_unix(spec);
        }

        #[cfg(not(unix))]
        {
            if spec.timeout.is_some() {
                return Err(AdapterError::TimeoutUnsupported);
            }
            run_portable(spec)
        }
    }
}

fn keep_tail(mut bytes: Vec<u8>, cap: usize) -> Vec<u8> {
    if bytes.len() > cap {
        bytes.drain(..bytes.len() - cap);
    }
    bytes
}

fn build_command(spec: &CommandSpec) -> std::process::Command {
    let mut cmd = std::process::Command::new(&spec.argv[0]);
    cmd.args(&spec.argv[1..]);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    cmd
}

#[cfg(not(unix))]
fn run_portable(spec: &CommandSpec) -> Result<RunResult, AdapterError> {
    let start = Instant::now();
    let out = build_command(spec)
        .stdin(std::process::Stdio::null())
        .output()
        .with_context(|| format!("failed to run {:?}", spec.argv))
        .map_err(AdapterError::Other)?;

    Ok(RunResult {
        wall_ms: start.elapsed().as_millis() as u64,
        exit_code: out.status.code().unwrap_or(-1),
        timed_out: false,
        stdout: keep_tail(out.stdout, spec.output_cap_bytes),
        stderr: keep_tail(out.stderr, spec.output_cap_bytes),
    })
}

#[cfg(unix)]
fn run_unix(spec: &CommandSpec) -> Result<RunResult, AdapterError> {
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use std::thread;

    let start = Instant::now();

    let mut cmd = build_command(spec);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", spec.argv))
        .map_err(AdapterError::Other)?;

    let pid = child.id() as libc::pid_t;

    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(AdapterError::Other(anyhow::anyhow!(
            "child stdio was not piped for {:?}",
            spec.argv
        )));
    };

    let cap = spec.output_cap_bytes;

    let out_handle = thread::spawn(move || read_tail(&mut stdout, cap));
    let err_handle = thread::spawn(move || read_tail(&mut stderr, cap));

    let (status_raw, timed_out) = waitpid_with_timeout(pid, spec.timeout)?;

    // Safety: the child was reaped by waitpid; drop the handle without waiting.
    drop(child);

    let stdout = out_handle.join().unwrap_or_default();
    let stderr = err_handle.join().unwrap_or_default();

    let exit_status = std::process::ExitStatus::from_raw(status_raw);

    Ok(RunResult {
        wall_ms: start.elapsed().as_millis() as u64,
        exit_code: exit_status.code().unwrap_or(-1),
        timed_out,
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn read_tail<R: std::io::Read>(reader: &mut R, cap: usize) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 8192];

    loop {
        match reader.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if buf.len() > cap.saturating_mul(2).max(8192) {
                    buf = keep_tail(buf, cap);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    keep_tail(buf, cap)
}

#[cfg(unix)]
fn waitpid_with_timeout(
    pid: libc::pid_t,
    timeout: Option<Duration>,
) -> Result<(libc::c_int, bool), AdapterError> {
    let start = Instant::now();
    let mut status: libc::c_int = 0;
    let mut timed_out = false;

    loop {
        let options = if timeout.is_some() { libc::WNOHANG } else { 0 };

        let res = unsafe { libc::waitpid(pid, &mut status as *mut libc::c_int, options) };

        if res == pid {
            break;
        }

        if res == 0 {
            // still running
            if let Some(t) = timeout
                && start.elapsed() >= t
            {
                timed_out = true;
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                let res2 = unsafe { libc::waitpid(pid, &mut status as *mut libc::c_int, 0) };
                if res2 != pid {
                    return Err(AdapterError::Other(anyhow::anyhow!(
                        "waitpid after kill failed: {:?}",
                        std::io::Error::last_os_error()
                    )));
                }
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }

        if res == -1 {
            let err = std::io::Error::last_os_error();
            // Ctrl-C lands here while Terraform winds down; keep waiting for it.
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(AdapterError::Other(anyhow::anyhow!("waitpid failed: {err}")));
        }

        return Err(AdapterError::Other(anyhow::anyhow!(
            "waitpid returned unexpected pid: {res}"
        )));
    }

    Ok((status, timed_out))
}
