//! quiesce — find idle workloads and scale them to zero.
//!
//! Assembles the cluster, metrics, and flow-store collaborators from a
//! YAML config file and runs the sweep engine once or on an interval.
//!
//! # Usage
//!
//! ```text
//! quiesce --config /etc/quiesce/config.yaml run --dry-run
//! quiesce watch --interval 30m --unsafe
//! quiesce check-config
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quiesce_core::QuiesceConfig;
use quiesce_core::config::parse_duration;
use quiesce_engine::{Sweep, SweepReport};
use quiesce_providers::Providers;

#[derive(Parser)]
#[command(name = "quiesce", about = "Scale idle workloads to zero", version)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, global = true, env = "QUIESCE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single sweep and exit.
    Run(SweepArgs),

    /// Run independent sweeps on an interval until Ctrl-C.
    Watch {
        #[command(flatten)]
        sweep: SweepArgs,

        /// Pause between sweeps (e.g. "30m", "1h").
        #[arg(long, default_value = "1h")]
        interval: String,
    },

    /// Validate the config file and print the effective settings.
    CheckConfig,
}

#[derive(Args, Clone)]
struct SweepArgs {
    /// Evaluate and report, but never change replica counts.
    #[arg(long)]
    dry_run: bool,

    /// Keep workloads whose traffic signals disagree.
    #[arg(long, conflicts_with = "unsafe_mode")]
    safe: bool,

    /// Scale workloads whose traffic signals disagree.
    #[arg(long = "unsafe")]
    unsafe_mode: bool,

    /// Report format written to stdout.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

impl SweepArgs {
    fn apply(&self, config: &mut QuiesceConfig) {
        if self.dry_run {
            config.scale_enable = false;
        }
        if self.safe {
            config.safe_scale = true;
        }
        if self.unsafe_mode {
            config.safe_scale = false;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run(args) => {
            let config = load_config(&cli.config, Some(&args))?;
            run_once(config, args.output).await
        }
        Command::Watch { sweep, interval } => {
            let interval = parse_duration(&interval)
                .filter(|d| !d.is_zero())
                .with_context(|| format!("invalid --interval {interval:?}"))?;
            let config = load_config(&cli.config, Some(&sweep))?;
            run_watch(config, sweep.output, interval).await
        }
        Command::CheckConfig => check_config(&cli.config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quiesce=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: &Path, args: Option<&SweepArgs>) -> anyhow::Result<QuiesceConfig> {
    let mut config = QuiesceConfig::from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(args) = args {
        args.apply(&mut config);
    }
    Ok(config)
}

async fn build_sweep(config: &QuiesceConfig) -> anyhow::Result<Sweep> {
    let providers = Providers::connect(config)
        .await
        .context("initializing collaborators")?;

    info!(
        safety = ?config.safety_mode(),
        apply = ?config.apply_mode(),
        cross_check = config.use_deepflow,
        reduction = ?config.workload_reduction,
        "quiesce starting"
    );

    Ok(Sweep::from_config(
        config,
        providers.cluster,
        providers.metrics,
        providers.flows,
    ))
}

async fn run_once(config: QuiesceConfig, output: OutputFormat) -> anyhow::Result<()> {
    let sweep = build_sweep(&config).await?;
    let report = sweep.run(shutdown_signal()).await?;
    print_report(&report, output)?;

    let failed = report.summary().failed;
    if failed > 0 {
        bail!("{failed} scale-down(s) failed");
    }
    Ok(())
}

async fn run_watch(
    config: QuiesceConfig,
    output: OutputFormat,
    interval: std::time::Duration,
) -> anyhow::Result<()> {
    let sweep = build_sweep(&config).await?;
    sweep
        .run_every(interval, shutdown_signal(), |report| {
            if let Err(e) = print_report(report, output) {
                error!(error = %e, "failed to write report");
            }
        })
        .await;

    info!("quiesce stopped");
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let mut config = load_config(path, None)?;
    if !config.deepflow_clickhouse_password.is_empty() {
        config.deepflow_clickhouse_password = "<redacted>".to_string();
    }
    print!("{}", config.to_yaml_string()?);
    info!(path = %path.display(), "config is valid");
    Ok(())
}

fn print_report(report: &SweepReport, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = tx.send(true);
        }
    });
    rx
}
