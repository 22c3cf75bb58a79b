//! Block rewrite CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use blockdb::block::BlockReader;
use blockdb::{Block, ChunkPool, DiskWriter};
use compact::{
    Compactor, ChangeLog, DeletionModifier, Modifier, RewriteConfig, SeriesProgressLogger,
    compacted_meta, load_config,
};

/// CLI arguments for the rewriter.
#[derive(Parser, Debug)]
#[command(name = "compact")]
#[command(about = "Rewrite time-series blocks, optionally applying deletions")]
struct CliArgs {
    /// Input block directories, each holding meta.json/index/chunks/tombstones
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output directory for the rewritten block
    #[arg(short, long)]
    output: PathBuf,

    /// Path to a YAML file of deletion requests to apply
    #[arg(short, long, env = "COMPACT_DELETIONS_FILE")]
    deletions: Option<PathBuf>,

    /// Produce stats and the change log without writing any output
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() {
    // Initialize tracing; log level comes from RUST_LOG, defaulting to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let config = match &args.deletions {
        Some(path) => match load_config(path) {
            Ok(config) => {
                tracing::info!("loaded deletion config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::error!("failed to load deletion config: {}", e);
                std::process::exit(1);
            }
        },
        None => RewriteConfig::default(),
    };
    let requests = match config.deletion_requests() {
        Ok(requests) => requests,
        Err(e) => {
            tracing::error!("invalid deletion config: {}", e);
            std::process::exit(1);
        }
    };

    let mut blocks = Vec::with_capacity(args.input.len());
    for dir in &args.input {
        match Block::open(dir) {
            Ok(block) => {
                tracing::info!(
                    "opened block {} ({} series)",
                    dir.display(),
                    block.meta().stats.num_series
                );
                blocks.push(block);
            }
            Err(e) => {
                tracing::error!("failed to open block {}: {}", dir.display(), e);
                std::process::exit(1);
            }
        }
    }
    let readers: Vec<&dyn BlockReader> = blocks.iter().map(|b| b as &dyn BlockReader).collect();
    let total_series: usize = blocks
        .iter()
        .map(|b| b.meta().stats.num_series as usize)
        .sum();

    let deletion = DeletionModifier::new(requests);
    let modifiers: Vec<&dyn Modifier> = vec![&deletion];
    let changes = ChangeLog::new(std::io::stdout());
    let progress = SeriesProgressLogger::new(total_series);
    let cancel = CancellationToken::new();
    let pool = Arc::new(ChunkPool::new());

    let stats = if args.dry_run {
        let compactor = Compactor::new_dry_run(pool);
        let mut writer = blockdb::NullWriter::new();
        compactor.write_series(&cancel, &readers, &mut writer, &changes, &progress, &modifiers)
    } else {
        let compactor = Compactor::new(pool);
        let mut writer = match DiskWriter::new(&args.output) {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!("failed to create writer at {}: {}", args.output.display(), e);
                std::process::exit(1);
            }
        };
        compactor
            .write_series(&cancel, &readers, &mut writer, &changes, &progress, &modifiers)
            .and_then(|stats| {
                let meta = compacted_meta(&readers, stats, writer.time_range());
                meta.write_to_dir(writer.dir())?;
                tracing::info!("wrote block {} to {}", meta.ulid, args.output.display());
                Ok(stats)
            })
    };

    match stats {
        Ok(stats) => tracing::info!(
            "rewrote {} series, {} chunks, {} samples",
            stats.num_series,
            stats.num_chunks,
            stats.num_samples
        ),
        Err(e) => {
            tracing::error!(
                "rewrite failed: {}; remove any partial output at {}",
                e,
                args.output.display()
            );
            std::process::exit(1);
        }
    }
}
