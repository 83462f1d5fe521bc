//! `svcs` - Spatial VCS command line
//!
//! Usage:
//!   svcs simulate --probes 4 --direct 2 --messages 64 --seed 42 [--json]
//!   svcs stress --chunks 10000 --duplicates 0.25 [--path ./objects]
//!   svcs inspect ./objects [--json]
//!
//! Logging goes to stderr and honours `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use svcs_cli::{inspect_store, run_simulation, run_stress, SimulatorConfig, StressConfig};
use svcs_core::{RepoConfig, RepoError};
use svcs_merge::ConflictPolicy;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "svcs", version, about = "Spatial version control for streamed 3D captures")]
struct Cli {
    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run concurrent capture probes against a fresh repository
    Simulate {
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Probes capturing onto their own branches
        #[arg(long, default_value_t = 4)]
        probes: usize,
        /// Probes capturing straight onto the default branch
        #[arg(long, default_value_t = 2)]
        direct: usize,
        /// Messages per probe
        #[arg(long, default_value_t = 64)]
        messages: usize,
        /// Cells per axis of the scanned area
        #[arg(long, default_value_t = 8)]
        extent: i32,
        /// Fraction of messages resent
        #[arg(long, default_value_t = 0.05)]
        resend: f64,
        /// Merge policy: manual, ours or theirs
        #[arg(long, default_value = "manual")]
        policy: ConflictPolicy,
        /// Repository configuration (.toml, .yaml or .yml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Measure chunk store throughput and deduplication
    Stress {
        #[arg(long, default_value_t = 10_000)]
        chunks: usize,
        /// Fraction of chunks that repeat earlier ones
        #[arg(long, default_value_t = 0.25)]
        duplicates: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Filesystem store root (in memory when omitted)
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Report statistics and integrity of a filesystem chunk store
    Inspect {
        /// Store root directory
        path: PathBuf,
        #[arg(long, default_value_t = 1024)]
        cache: u64,
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,svcs=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn print_report<T: serde::Serialize>(json: bool, report: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

async fn run(command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Simulate {
            seed,
            probes,
            direct,
            messages,
            extent,
            resend,
            policy,
            config,
            json,
        } => {
            let repo = match config {
                Some(path) => RepoConfig::load(&path)
                    .map_err(RepoError::from)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => RepoConfig::default(),
            };
            let report = run_simulation(SimulatorConfig {
                seed,
                branch_probes: probes,
                direct_probes: direct,
                messages_per_probe: messages,
                extent,
                resend_rate: resend,
                policy,
                repo,
            })
            .await?;
            print_report(json, &report, || report.generate_text())?;
            Ok(report.passed())
        }
        Command::Stress {
            chunks,
            duplicates,
            seed,
            path,
            json,
        } => {
            let report = tokio::task::spawn_blocking(move || {
                run_stress(&StressConfig {
                    chunks,
                    duplicate_ratio: duplicates,
                    seed,
                    path,
                    ..StressConfig::default()
                })
            })
            .await??;
            print_report(json, &report, || report.generate_text())?;
            Ok(report.success)
        }
        Command::Inspect { path, cache, json } => {
            let report = inspect_store(&path, cache)?;
            print_report(json, &report, || report.generate_text())?;
            Ok(report.healthy())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<RepoError>()
                .map_or(1, |err| err.code().exit_code());
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
