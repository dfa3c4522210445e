//! tsvc - command-line driver for the taskservice runtime
//!
//! Spins up servers in-process to measure throughput and job timing.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use eyre::{Context as _, Result, eyre};
use tracing::info;

use taskservice::cli::{Cli, Command};
use taskservice::config::Config;
use taskservice::{Context, Registry, ScheduledJob, ServerStats};

/// Upper bound on how long `bench` waits for the queue to drain
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskservice")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level: tracing::Level = match log_level {
        Some(level) => level.parse().map_err(|_| eyre!("Invalid log level: {}", level))?,
        None => tracing::Level::INFO,
    };
    let log_file = fs::File::create(log_dir.join("tsvc.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Bench {
            messages,
            capacity,
            coalesce,
            sync,
        } => cmd_bench(&config, messages, capacity, coalesce, sync).await,
        Command::Jobs { interval_ms, window_ms } => cmd_jobs(&config, interval_ms, window_ms).await,
        Command::ShowConfig => cmd_show_config(&config),
    }
}

async fn cmd_bench(config: &Config, messages: u64, capacity: Option<usize>, coalesce: bool, sync: bool) -> Result<()> {
    let registry: Registry<u64, u64> = Registry::with_config(&config.dispatch);

    let mut options = config.dispatch.server_options();
    if let Some(capacity) = capacity {
        options = options.with_queue_capacity(capacity);
    }
    if coalesce {
        options = options.with_coalesce();
    }

    let server = registry.create(
        "bench",
        |_ctx: Context, n: u64, _worker: usize| async move { Ok::<_, eyre::Report>(n) },
        vec![],
        options,
    )?;
    server.start()?;
    info!(messages, sync, coalesce, workers = server.worker_count(), "Bench starting");

    let ctx = Context::background();
    let started = Instant::now();
    for n in 0..messages {
        if sync {
            server.send_sync(&ctx, n).await?;
        } else {
            server.send_async(&ctx, n).await?;
        }
    }

    tokio::time::timeout(DRAIN_TIMEOUT, async {
        loop {
            let stats = server.stats();
            if stats.processed + stats.coalesced >= messages {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .map_err(|_| eyre!("Queue did not drain within {:?}", DRAIN_TIMEOUT))?;

    let elapsed = started.elapsed();
    let stats = server.stats();
    registry.stop("bench").await?;

    let rate = messages as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("{} {} messages in {:.2?} ({:.0} msg/s)", "bench".green().bold(), messages, elapsed, rate);
    print_stats(&stats);
    Ok(())
}

async fn cmd_jobs(config: &Config, interval_ms: u64, window_ms: u64) -> Result<()> {
    let registry: Registry<(), ()> = Registry::with_config(&config.dispatch);

    let fired = Arc::new(AtomicU64::new(0));
    let fired_in_job = fired.clone();
    let job = ScheduledJob::new(Duration::from_millis(interval_ms), move |_index| {
        let fired = fired_in_job.clone();
        async move {
            fired.fetch_add(1, Ordering::Relaxed);
        }
    });

    let server = registry.create_without_handler("jobs", vec![job], config.dispatch.server_options())?;
    server.start()?;
    tokio::time::sleep(Duration::from_millis(window_ms)).await;
    registry.stop("jobs").await?;

    println!(
        "{} fired {} times in {}ms (interval {}ms)",
        "jobs".green().bold(),
        fired.load(Ordering::Relaxed),
        window_ms,
        interval_ms
    );
    Ok(())
}

fn cmd_show_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

fn print_stats(stats: &ServerStats) {
    println!("  {:<18} {}", "enqueued".cyan(), stats.enqueued);
    println!("  {:<18} {}", "processed".cyan(), stats.processed);
    println!("  {:<18} {}", "coalesced".cyan(), stats.coalesced);
    println!("  {:<18} {}", "handler errors".cyan(), stats.handler_errors);
    println!("  {:<18} {}", "panics".cyan(), stats.panics);
}
