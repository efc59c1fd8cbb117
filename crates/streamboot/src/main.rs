use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use streamboot::config::{self, LauncherConfig};
use streamboot::fetch::Fetcher;
use streamboot::logging::{self, LogFormat};
use streamboot::marker::CompletionMarker;
use streamboot::materialize::Materializer;
use streamboot::report::{ConsoleSink, FailureStage, LaunchEvent, ReportSink};
use streamboot::secrets::{ConfiguredSecrets, SecretKeys};
use streamboot::workspace::Workspace;
use streamboot::{Launcher, Result, WarmStartPolicy};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Launcher config TOML (optional; defaults apply when missing)
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Log filter (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download the application once, write it, and start it
    Run {
        /// Completion marker path
        #[arg(long)]
        marker: Option<PathBuf>,
        /// Directory relative destination paths resolve against
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// Refuse destinations outside the root directory
        #[arg(long)]
        confine: bool,
        /// What to do when the marker already exists
        #[arg(long, value_enum)]
        on_warm_start: Option<WarmStartPolicy>,
        /// Print failures only
        #[arg(long)]
        quiet: bool,
    },
    /// Show whether the completion marker is present
    Status {
        #[arg(long)]
        marker: Option<PathBuf>,
    },
    /// Print the effective configuration (secret values are never included)
    Resolve,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = logging::init(&args.log_level, args.log_format) {
        eprintln!("WARN: {e}");
    }

    let quiet = matches!(args.cmd, Command::Run { quiet: true, .. });
    match dispatch(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(kind = %e.kind(), "unhandled error: {e}");
            let sink = if quiet {
                ConsoleSink::quiet()
            } else {
                ConsoleSink::default()
            };
            sink.emit(LaunchEvent::Failed {
                stage: FailureStage::Unhandled,
                message: e.to_string(),
            });
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Args) -> Result<ExitCode> {
    let mut cfg = config::load_or_default(&args.config)?;
    match args.cmd {
        Command::Run {
            marker,
            root_dir,
            confine,
            on_warm_start,
            quiet,
        } => {
            if let Some(p) = marker {
                cfg.marker.path = Some(p);
            }
            if let Some(dir) = root_dir {
                cfg.workspace.root_dir = dir.to_string_lossy().into_owned();
            }
            if confine {
                cfg.workspace.confine = true;
            }
            if let Some(policy) = on_warm_start {
                cfg.launch.on_warm_start = policy;
            }
            cmd_run(&cfg, quiet)
        }
        Command::Status { marker } => {
            if let Some(p) = marker {
                cfg.marker.path = Some(p);
            }
            cmd_status(&cfg)
        }
        Command::Resolve => cmd_resolve(&cfg),
    }
}

fn marker_for(cfg: &LauncherConfig) -> CompletionMarker {
    cfg.marker
        .path
        .clone()
        .map(CompletionMarker::at)
        .unwrap_or_default()
}

fn cmd_run(cfg: &LauncherConfig, quiet: bool) -> Result<ExitCode> {
    let marker = marker_for(cfg);
    let workspace = Workspace::from_config(&cfg.workspace)?;
    let secrets = ConfiguredSecrets::new(&cfg.secrets);
    let fetcher = Fetcher::from_config(&cfg.fetch)?;
    let entry = streamboot::entry::from_config(&cfg.entry, workspace.root());
    let materializer = Materializer::new(workspace, marker);
    let sink = if quiet {
        ConsoleSink::quiet()
    } else {
        ConsoleSink::default()
    };

    let outcome = Launcher::new(&secrets, &fetcher, &materializer, entry.as_ref(), &sink)
        .with_keys(SecretKeys::from(&cfg.secrets))
        .with_warm_start(cfg.launch.on_warm_start)
        .run()?;
    tracing::debug!(?outcome, "launch finished");

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_status(cfg: &LauncherConfig) -> Result<ExitCode> {
    let marker = marker_for(cfg);
    let st = marker.status();
    println!("marker:  {}", marker.path().display());
    println!("present: {}", st.present);
    if let Some(pid) = st.pid {
        println!("pid:     {pid}");
    }
    if let Some(at) = st.written_at {
        println!("written: {}", at.to_rfc3339());
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_resolve(cfg: &LauncherConfig) -> Result<ExitCode> {
    print!("{}", cfg.to_toml_string()?);
    Ok(ExitCode::SUCCESS)
}
