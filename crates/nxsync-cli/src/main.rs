//! nxsync: incremental, resumable backup agent CLI
//!
//! Usage:
//!   nxsync backup <source-dir> [options]
//!   nxsync restore <remote-path> [<destination>] [options]
//!
//! A bare positional with no subcommand keyword is treated as `backup`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nxsync_core::config::NxsyncConfig;
use nxsync_engine::orchestrator::{SyncOptions, SyncOrchestrator};
use nxsync_engine::scheduler;
use nxsync_remote::RemoteClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nxsync", version, about = "Incremental, resumable backup agent")]
struct Cli {
    /// Path to the nxsync.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "NXSYNC_CONFIG",
        default_value = "nxsync.toml",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// A bare positional with no subcommand keyword is treated as `backup`,
/// mirroring how `cargo <crate-root-relative-path>` infers its subcommand.
/// Rewrites argv before handing it to `Cli::parse_from`.
fn normalize_args(args: Vec<String>) -> Vec<String> {
    let Some(first) = args.get(1) else {
        return args;
    };
    if first == "backup" || first == "restore" || first.starts_with('-') {
        return args;
    }
    let mut rewritten = Vec::with_capacity(args.len() + 1);
    rewritten.push(args[0].clone());
    rewritten.push("backup".to_string());
    rewritten.extend(args.into_iter().skip(1));
    rewritten
}

#[derive(clap::Args, Debug, Clone)]
struct SharedArgs {
    /// Remote folder for backup, or local destination for restore
    #[arg(long)]
    target: Option<String>,

    /// Concurrency override (1..64)
    #[arg(long, value_parser = clap::value_parser!(usize).range(1..=64))]
    cores: Option<usize>,

    /// Cron expression for daemon mode
    #[arg(long)]
    schedule: Option<String>,

    /// Enable the long-running cron loop
    #[arg(long)]
    daemon: bool,

    /// Ignore change detection and re-upload everything
    #[arg(long)]
    force: bool,

    /// Enable ResumableUploader for large files
    #[arg(long)]
    resume: bool,

    /// Chunk size override in MiB (1..1024)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=1024))]
    chunk_size: Option<u64>,

    /// Hashing worker pool size during scan (1..64)
    #[arg(long, value_parser = clap::value_parser!(usize).range(1..=64))]
    scan_concurrency: Option<usize>,

    /// Do not skip dotfiles/dotdirs during scan
    #[arg(long)]
    include_hidden: bool,

    /// Minimal output
    #[arg(long)]
    quiet: bool,

    /// Per-file output
    #[arg(long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory and upload changed files
    Backup {
        source: PathBuf,
        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Download files from a remote path
    Restore {
        remote_path: String,
        destination: Option<PathBuf>,
        #[command(flatten)]
        shared: SharedArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = normalize_args(std::env::args().collect());
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            e.print().ok();
            std::process::exit(1);
        }
    };

    let config = load_config(&cli.config).await;
    init_logging(&config.logging.level, &config.logging.format);

    let result = match cli.command {
        Commands::Backup { source, shared } => run_backup(&config, source, shared).await,
        Commands::Restore {
            remote_path,
            destination,
            shared,
        } => run_restore(&config, remote_path, destination, shared).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn load_config(path: &PathBuf) -> NxsyncConfig {
    if path.exists() {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("warning: failed to parse {}: {e} (using defaults)", path.display());
                    NxsyncConfig::default()
                }
            },
            Err(e) => {
                eprintln!("warning: failed to read {}: {e} (using defaults)", path.display());
                NxsyncConfig::default()
            }
        }
    } else {
        NxsyncConfig::default()
    }
}

fn init_logging(level: &str, format: &str) {
    use nxsync_engine::progress::ProgressAwareWriter;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("NXSYNC_LOG").unwrap_or_default()))
        .unwrap_or_else(|_| EnvFilter::new(level));

    // `ProgressAwareWriter` suspends whichever progress bar a running backup
    // or restore owns for the duration of each line, so a log line never
    // corrupts it.
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(ProgressAwareWriter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(ProgressAwareWriter))
            .init();
    }
}

fn state_paths(config: &NxsyncConfig) -> (PathBuf, PathBuf, PathBuf) {
    let tmp = std::env::temp_dir();
    let hash_cache = config
        .cache
        .hash_cache_path
        .clone()
        .unwrap_or_else(|| tmp.join("nxsync-hash-cache.json"));
    let scanner_state = config
        .cache
        .state_dir
        .clone()
        .unwrap_or_else(|| tmp.join("nxsync-state.json"));
    let resume_dir = config
        .cache
        .resume_dir
        .clone()
        .unwrap_or_else(|| tmp.join("nxsync-uploads"));
    (hash_cache, scanner_state, resume_dir)
}

fn build_sync_options(config: &NxsyncConfig, source: PathBuf, shared: &SharedArgs) -> SyncOptions {
    let (hash_cache_path, scanner_state_path, resume_state_dir) = state_paths(config);
    SyncOptions {
        source_dir: source,
        remote_target: shared.target.clone().unwrap_or_else(|| "/".to_string()),
        cores: shared.cores.or(config.concurrency),
        force: shared.force,
        resume: shared.resume || config.resume.enabled,
        chunk_size_mib: shared.chunk_size.unwrap_or(config.resume.chunk_size_mib),
        quiet: shared.quiet,
        verbose: shared.verbose,
        scan_concurrency: shared.scan_concurrency.unwrap_or(1),
        include_hidden: shared.include_hidden,
        hash_cache_path,
        scanner_state_path,
        resume_state_dir,
    }
}

async fn run_backup(config: &NxsyncConfig, source: PathBuf, shared: SharedArgs) -> Result<()> {
    let remote = Arc::new(RemoteClient::new(config.remote.binary.clone()));
    let orchestrator = Arc::new(SyncOrchestrator::new(remote));

    if shared.daemon {
        let schedule = shared
            .schedule
            .clone()
            .context("--daemon requires --schedule")?;
        let config = config.clone();
        let shared = shared.clone();
        let source = source.clone();
        let factory: Arc<dyn scheduler::SyncOptionsFactory> =
            Arc::new(move || build_sync_options(&config, source.clone(), &shared));
        info!(schedule = %schedule, "entering daemon mode");
        return scheduler::run_daemon(orchestrator, &schedule, factory).await;
    }

    let opts = build_sync_options(config, source, &shared);
    let summary = orchestrator.sync_once(opts).await?;

    if !shared.quiet {
        println!(
            "{} succeeded / {} failed out of {}",
            summary.succeeded, summary.failed, summary.total
        );
    }
    Ok(())
}

async fn run_restore(
    config: &NxsyncConfig,
    remote_path: String,
    destination: Option<PathBuf>,
    shared: SharedArgs,
) -> Result<()> {
    let remote = Arc::new(RemoteClient::new(config.remote.binary.clone()));
    let orchestrator = SyncOrchestrator::new(remote);

    let destination = destination
        .or_else(|| shared.target.clone().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    let summary = orchestrator
        .restore_once(&remote_path, &destination, shared.force, shared.cores, shared.quiet)
        .await?;

    if !shared.quiet {
        println!(
            "{} succeeded / {} failed out of {}",
            summary.succeeded, summary.failed, summary.total
        );
    }

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
