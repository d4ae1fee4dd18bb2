// Crawl scheduler CLI
//
// Ingests a URL list, then dispatches it with `HttpFetcher` under the
// configured politeness controls until the queue drains or Ctrl-C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawl_scheduler::{
    CheckpointSink, DeadLetterSink, FileSource, HttpFetcher, JsonCheckpointFile,
    JsonlDeadLetterSink, MemoryDeadLetterSink, PriorityTier, Scheduler, SchedulerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crawl-scheduler")]
#[command(about = "Politeness-aware crawl scheduler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every URL in a list, one per line
    Run {
        /// URL list
        #[arg(short, long)]
        urls: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append dead-lettered items to this JSON lines file
        #[arg(short, long)]
        dead_letter: Option<PathBuf>,

        /// Worker count (default: one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Checkpoint file; an existing one resumes the URL list where the
        /// last run left off
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Priority tier for the listed URLs
        #[arg(long, default_value = "normal", value_parser = parse_tier)]
        tier: PriorityTier,
    },
}

fn parse_tier(value: &str) -> Result<PriorityTier, String> {
    match value.to_ascii_lowercase().as_str() {
        "high" => Ok(PriorityTier::High),
        "normal" => Ok(PriorityTier::Normal),
        "low" => Ok(PriorityTier::Low),
        other => Err(format!("unknown tier '{other}' (expected high, normal or low)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            urls,
            config,
            dead_letter,
            workers,
            checkpoint,
            tier,
        } => run(urls, config, dead_letter, workers, checkpoint, tier).await,
    }
}

async fn run(
    urls: PathBuf,
    config_path: Option<PathBuf>,
    dead_letter: Option<PathBuf>,
    workers: Option<usize>,
    checkpoint: Option<PathBuf>,
    tier: PriorityTier,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => SchedulerConfig::from_json_file(&path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(workers) = workers {
        config.set_worker_count(workers);
        config.validate().context("Invalid --workers")?;
    }

    let fetcher = Arc::new(
        HttpFetcher::new(config.user_agent(), config.max_content_length())
            .context("Failed to build HTTP client")?,
    );
    let dead_letters: Arc<dyn DeadLetterSink> = match &dead_letter {
        Some(path) => Arc::new(
            JsonlDeadLetterSink::open(path)
                .await
                .with_context(|| format!("Failed to open dead-letter file {}", path.display()))?,
        ),
        None => Arc::new(MemoryDeadLetterSink::new()),
    };

    let mut scheduler = Scheduler::new(config, fetcher, dead_letters);
    let mut offset = 0;
    if let Some(path) = checkpoint {
        let sink = JsonCheckpointFile::new(path);
        if let Some(previous) = sink.load().context("Failed to read checkpoint")? {
            info!("Resuming {} at offset {}", urls.display(), previous.committed_offset);
            offset = previous.committed_offset;
        }
        let sink: Arc<dyn CheckpointSink> = Arc::new(sink);
        scheduler = scheduler.with_checkpoint_sink(sink).resume_from(offset);
    }
    let scheduler = Arc::new(scheduler);

    let report = scheduler
        .ingest(&FileSource::new(&urls), offset, tier)
        .await
        .with_context(|| format!("Failed to read URL list {}", urls.display()))?;
    info!(
        "Queued {} URLs ({} duplicates, {} invalid)",
        report.admitted, report.duplicates, report.invalid
    );

    let stopper = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight fetches");
            stopper.shutdown();
        }
    });

    let counters = scheduler.run_until_drained().await?;
    let metrics = scheduler.metrics().snapshot();
    info!(
        "Done: {} succeeded, {} retried, {} dead-lettered, {} rate-limit rejections (success rate {:.1}%)",
        metrics.succeeded,
        metrics.retried,
        metrics.dead_lettered,
        metrics.rate_limit_rejections,
        metrics.success_rate() * 100.0
    );
    info!("Committed offset {}", counters.committed_offset);
    Ok(())
}
