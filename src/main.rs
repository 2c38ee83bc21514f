use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ppstats::config::{Config, SinkKind};
use ppstats::{sd, worker};

/// OneFS partitioned-performance statistics collector.
#[derive(Parser)]
#[command(name = "ppstats", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("ppstats {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ppstats");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    if cfg.global.processor == SinkKind::Prometheus && cfg.prom_sd.enabled {
        sd::start_listener(&cfg)
            .await
            .context("starting prometheus SD listener")?;
    }

    let cfg = Arc::new(cfg);
    let mut workers = tokio::task::JoinSet::new();

    for (index, cluster) in cfg.clusters.iter().enumerate() {
        if cluster.disabled {
            tracing::info!(cluster = %cluster.hostname, "skipping disabled cluster");
            continue;
        }

        tracing::info!(cluster = %cluster.hostname, "spawning collection loop");
        let cfg = Arc::clone(&cfg);
        workers.spawn(async move {
            worker::run(cfg, index).await;
        });
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "collection worker panicked");
        }
    }

    tracing::info!("all collectors complete, exiting");

    Ok(())
}
