use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thumbsync::{JsonCatalogSource, PipelineConfig, PipelineCoordinator};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "thumbsync")]
#[command(about = "Fetch catalog thumbnails and normalize them to WebP", long_about = None)]
#[command(version)]
struct Args {
    /// Directory containing per-group catalog JSON files
    #[arg(short, long, default_value = "catalogs")]
    catalog: PathBuf,

    /// Output directory for normalized thumbnails
    #[arg(short, long, default_value = "thumbnails")]
    output: PathBuf,

    /// Directory holding checkpoint records
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Maximum concurrent downloads
    #[arg(long, default_value_t = 5)]
    fetch_concurrency: usize,

    /// Maximum concurrent transcodes
    #[arg(long, default_value_t = 2)]
    transcode_concurrency: usize,

    /// Fetch attempts per entry before recording it as failed
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Base retry delay in seconds; doubles on each subsequent attempt
    #[arg(long, default_value_t = 2)]
    retry_delay: u64,

    /// Per-attempt request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Minimum accepted asset size in bytes
    #[arg(long, default_value_t = 100)]
    min_bytes: usize,

    /// Maximum output long-edge dimension in pixels
    #[arg(long, default_value_t = 1024)]
    max_dimension: u32,

    /// WebP quality (0-100)
    #[arg(long, default_value_t = 85)]
    quality: u8,

    /// Re-fetch entries even when a completed checkpoint exists
    #[arg(long)]
    force: bool,

    /// Discard all prior checkpoints before starting
    #[arg(long)]
    clean: bool,

    /// Leave previously failed entries alone instead of retrying them
    #[arg(long)]
    no_retry_failed: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("thumbsync={}", log_level))
        .init();

    info!("🚀 Thumbsync - catalog thumbnail downloader");
    info!("Catalog directory: {:?}", args.catalog);
    info!("Output directory: {:?}", args.output);

    let config = PipelineConfig {
        output_dir: args.output,
        checkpoint_dir: args.checkpoint_dir,
        fetch_concurrency: args.fetch_concurrency.max(1),
        transcode_concurrency: args.transcode_concurrency.max(1),
        max_retries: args.max_retries.max(1),
        retry_base_delay: Duration::from_secs(args.retry_delay),
        request_timeout: Duration::from_secs(args.timeout),
        min_asset_bytes: args.min_bytes,
        max_dimension: args.max_dimension,
        quality: args.quality.min(100),
        force_refetch: args.force,
        clean_start: args.clean,
        retry_failed: !args.no_retry_failed,
        ..PipelineConfig::default()
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, letting in-flight work finish");
            interrupt.cancel();
        }
    });

    let source = JsonCatalogSource::new(args.catalog);
    let mut coordinator = PipelineCoordinator::new(config)?;
    let show_progress = atty::is(atty::Stream::Stdout);

    match coordinator.run(&source, cancel, show_progress).await {
        Ok(report) => {
            info!(
                "✅ Run finished: {}/{} completed, {} failed, {} duplicates",
                report.completed, report.total_entries, report.failed, report.skipped_duplicates
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}
