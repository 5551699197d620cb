use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tfgate_adapters::{locate_terraform, CancelFlag, StdProcessRunner, TerraformCli};
use tfgate_app::{github_annotations, render_markdown, ScenarioUseCase, SystemClock};
use tfgate_config::{
    apply_process_env_overrides, default_config_file, load_scenario, render_config_toml,
    DEFAULT_CONFIG_FILE,
};
use tfgate_types::{ScenarioConfig, ScenarioReceipt, ToolInfo};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "tfgate",
    version,
    about = "Provision a Terraform module, assert its outputs, and always tear it down"
)]
struct Cli {
    /// Log formatter for stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision the scenario, check its outputs, destroy it, and emit a receipt (JSON).
    Run {
        /// Scenario config (default: ./tfgate.toml if present, else the built-in SFTP scenario)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the Terraform module directory
        #[arg(long)]
        terraform_dir: Option<PathBuf>,

        /// Override the Terraform executable
        #[arg(long)]
        terraform_binary: Option<String>,

        /// Per-command timeout (e.g. "30m")
        #[arg(long)]
        command_timeout: Option<String>,

        /// Output file path
        #[arg(long, default_value = "tfgate.json")]
        out: PathBuf,

        /// Pretty-print JSON
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },

    /// Print the built-in scenario as a TOML config.
    PrintConfig,

    /// Render a Markdown summary from a scenario receipt.
    Md {
        #[arg(long)]
        receipt: PathBuf,

        /// Output markdown path (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Emit GitHub Actions annotations from a scenario receipt.
    GithubAnnotations {
        #[arg(long)]
        receipt: PathBuf,
    },
}

fn main() -> ExitCode {
    match real_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn real_main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.cmd {
        Command::Run {
            config,
            terraform_dir,
            terraform_binary,
            command_timeout,
            out,
            pretty,
        } => {
            let mut cfg = resolve_config(config.as_deref())?;
            apply_process_env_overrides(&mut cfg);
            if let Some(dir) = terraform_dir {
                cfg.terraform_dir = dir;
            }
            if let Some(binary) = terraform_binary {
                cfg.terraform_binary = binary;
            }
            if let Some(timeout) = command_timeout.as_deref() {
                cfg.command_timeout = Some(parse_duration(timeout)?);
            }

            preflight(&mut cfg)?;

            // SIGINT, plus SIGTERM and SIGHUP via the `termination` feature.
            let cancel = CancelFlag::default();
            let handler_flag = Arc::clone(&cancel);
            ctrlc::set_handler(move || {
                if !handler_flag.swap(true, Ordering::SeqCst) {
                    eprintln!("tfgate: interrupt received, tearing down before exit");
                }
            })
            .context("install interrupt handler")?;

            let provisioner = TerraformCli::new(StdProcessRunner).with_cancel(Arc::clone(&cancel));
            let usecase =
                ScenarioUseCase::new(provisioner, SystemClock, tool_info()).with_cancel(cancel);
            let outcome = usecase.execute(&cfg)?;

            write_json(&out, &outcome.receipt, pretty)?;
            info!(receipt = %out.display(), "wrote receipt");

            if outcome.passed() {
                return Ok(ExitCode::from(0));
            }
            for reason in &outcome.receipt.verdict.reasons {
                eprintln!("tfgate: {reason}");
            }
            if outcome.is_fatal() || outcome.teardown_failed() {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::from(2))
            }
        }

        Command::PrintConfig => {
            let text = render_config_toml(&default_config_file())?;
            print!("{text}");
            Ok(ExitCode::from(0))
        }

        Command::Md { receipt, out } => {
            let receipt: ScenarioReceipt = read_json(&receipt)?;
            let md = render_markdown(&receipt);

            match out {
                Some(path) => {
                    fs::write(&path, md).with_context(|| format!("write {}", path.display()))?;
                }
                None => {
                    print!("{md}");
                }
            }

            Ok(ExitCode::from(0))
        }

        Command::GithubAnnotations { receipt } => {
            let receipt: ScenarioReceipt = read_json(&receipt)?;
            for line in github_annotations(&receipt) {
                println!("{line}");
            }
            Ok(ExitCode::from(0))
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<ScenarioConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            local.is_file().then_some(local)
        }
    };
    let cfg = load_scenario(path.as_deref())?;
    Ok(cfg)
}

/// Fail before provisioning anything if the run cannot possibly work.
fn preflight(cfg: &mut ScenarioConfig) -> anyhow::Result<()> {
    if !cfg.terraform_dir.is_dir() {
        anyhow::bail!(
            "terraform module directory {} does not exist",
            cfg.terraform_dir.display()
        );
    }
    // Commands run inside the module directory, so pin the binary to an absolute path.
    let binary = locate_terraform(&cfg.terraform_binary)?;
    cfg.terraform_binary = fs::canonicalize(&binary)
        .unwrap_or(binary)
        .to_string_lossy()
        .into_owned();
    Ok(())
}

fn tool_info() -> ToolInfo {
    ToolInfo {
        name: "tfgate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let d = humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))?;
    Ok(d)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let v =
        serde_json::from_slice(&bytes).with_context(|| format!("parse json {}", path.display()))?;
    Ok(v)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T, pretty: bool) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }

    let bytes = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };

    atomic_write(path, &bytes)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    use std::io::Write;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = parent.to_path_buf();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4()));

    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("create temp {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write temp {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
