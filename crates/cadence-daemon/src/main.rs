use std::sync::Arc;

use cadence_core::CadenceConfig;
use cadence_scheduler::{Scheduler, ShutdownMode};
use clap::Parser;
use tracing::info;

mod listener;
mod seed;

#[derive(Parser)]
#[command(name = "cadence-daemon")]
#[command(about = "In-process job scheduler daemon")]
struct Args {
    /// Configuration file (defaults to ~/.cadence/cadence.toml)
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<String>,

    /// Return on shutdown without waiting for running jobs
    #[arg(long)]
    immediate: bool,

    /// Print the registered job functions and exit
    #[arg(long)]
    list_functions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_daemon=info,cadence_scheduler=info,cadence_jobs=info".into()),
        )
        .init();

    let args = Args::parse();

    let registry = cadence_jobs::default_registry();
    if args.list_functions {
        for f in registry.list() {
            println!("{:<16} {}", f.name, f.description);
        }
        return Ok(());
    }

    // config: --config / CADENCE_CONFIG > ~/.cadence/cadence.toml, then CADENCE_* env
    let figment = CadenceConfig::figment(args.config.as_deref());
    let config = CadenceConfig::from_figment(&figment)?;
    let seeds = seed::seed_jobs(&figment)?;

    let scheduler = Scheduler::new(config.scheduler.clone(), registry)?;
    scheduler.subscribe(Arc::new(listener::LogListener));
    let seeded = seed::install(&scheduler, seeds)?;

    scheduler.start()?;
    info!(
        jobs = seeded,
        workers = config.scheduler.worker_count,
        timezone = %config.scheduler.timezone,
        "cadence daemon running"
    );

    wait_for_signal().await;

    let mode = if args.immediate {
        ShutdownMode::Immediate
    } else {
        ShutdownMode::Drain
    };
    info!(?mode, in_flight = scheduler.status().in_flight, "shutdown requested");
    scheduler.shutdown(mode).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("cannot install SIGTERM handler ({e}), waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl+C");
    }
}
