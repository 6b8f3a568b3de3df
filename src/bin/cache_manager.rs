use anyhow::Result;
use clap::{Parser, Subcommand};
use loopscan::CandidateCache;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cache-manager")]
#[command(about = "Candidate cache management utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List all scanned sources
    List,
    /// Get cache statistics
    Stats,
    /// Forget a source so the next scan picks it up again
    Invalidate {
        /// Source identifier (file stem with spaces as underscores)
        video_id: String,
    },
    /// Clear all cache entries
    Clear,
    /// Drop entries whose source file no longer exists
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let cli = Cli::parse();
    let mut cache = CandidateCache::open(&cli.cache_dir).await?;

    match cli.command {
        Commands::List => {
            let sources = cache.list();

            if sources.is_empty() {
                info!("📭 No scanned sources found");
                return Ok(());
            }

            info!("📚 Found {} scanned sources:", sources.len());

            for source in sources {
                info!(
                    "  {} - {} candidates, {:.0}s, scanned {}",
                    source.video_id,
                    source.candidate_count,
                    source.duration,
                    source.scanned_at.format("%Y-%m-%d %H:%M")
                );
                if let Some(path) = &source.source_path {
                    info!("    Path: {}", path.display());
                }
            }
        }

        Commands::Stats => {
            let stats = cache.stats();
            info!("📊 Cache Statistics:");
            info!("  Sources: {}", stats.sources);
            info!("  Candidates: {}", stats.candidates);
            info!("  Sources without candidates: {}", stats.sources_without_candidates);
            info!("  Missing sources: {}", stats.missing_sources);
        }

        Commands::Invalidate { video_id } => {
            if cache.invalidate(&video_id).await? {
                info!("✅ Successfully invalidated cache for: {}", video_id);
            } else {
                warn!("⚠️ Source not found in cache: {}", video_id);
            }
        }

        Commands::Clear => {
            let count = cache.clear().await?;
            info!("🧹 Cleared {} cached sources", count);
        }

        Commands::Prune => {
            let count = cache.prune_missing().await?;
            info!("🗑️ Pruned {} missing sources", count);
        }
    }

    Ok(())
}
