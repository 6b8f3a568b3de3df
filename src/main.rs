use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use loopscan::selection::{load_records, select_new};
use loopscan::{
    dedupe_per_source, select_top, CandidateCache, Config, FfmpegService, RankPolicy, Scanner, SelectionSet,
};

#[derive(Parser)]
#[command(name = "loopscan")]
#[command(version, author = "TigreRoll")]
#[command(about = "Loop point and scene cut discovery over long video recordings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the standard search locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the candidate cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Override the number of parallel workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every source for loop candidates, resuming from the cache
    Scan {
        /// Directory containing source recordings
        #[arg(short = 'd', long)]
        source_root: Option<PathBuf>,
        /// Rescan sources that are already cached
        #[arg(long)]
        rescan: bool,
    },
    /// Detect scene cuts and write the segment partition of each source
    Cuts {
        #[arg(short = 'd', long)]
        source_root: Option<PathBuf>,
        #[arg(short, long, default_value = "cuts_results.json")]
        output: PathBuf,
    },
    /// De-duplicate cached candidates and write a results file
    Select {
        #[arg(short, long, default_value = "scan_results.json")]
        output: PathBuf,
        /// Rank across sources and keep the global top N
        #[arg(long)]
        top: bool,
        /// Skip segments already present in a previous results file
        #[arg(long)]
        exclude: Option<PathBuf>,
    },
    /// Rank clips against a taste set with diversity
    Recommend {
        /// Directory of candidate clips or posters
        #[arg(long)]
        clips: PathBuf,
        /// Directory of previously curated clips or posters
        #[arg(long)]
        taste: Option<PathBuf>,
        /// Number of picks (defaults to the configured value)
        #[arg(short)]
        n: Option<usize>,
        #[arg(short, long, default_value = "recommendations.json")]
        output: PathBuf,
    },
    /// Transcode the segments of a results file
    Export {
        #[arg(short, long, default_value = "scan_results.json")]
        results: PathBuf,
        /// Defaults to the configured output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Re-search a tighter loop around each segment of a results file
    Refine {
        #[arg(short, long, default_value = "scan_results.json")]
        results: PathBuf,
        /// Seconds searched on each side of a segment
        #[arg(long, default_value_t = 2.0)]
        margin: f64,
        #[arg(short, long, default_value = "refined_results.json")]
        output: PathBuf,
    },
    /// Show the effective configuration
    Config {
        /// Write it as TOML to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            warn!("Failed to load {}, using defaults: {}", path.display(), e);
            Config::from_env()
        }),
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::from_env()
        }),
    };

    if let Some(dir) = &cli.cache_dir {
        config.paths.cache_dir = dir.clone();
    }
    if let Some(workers) = cli.workers {
        config.performance.max_workers = workers;
    }
    config
}

fn build_scanner(config: Config) -> Result<Scanner> {
    let media = Arc::new(FfmpegService::new(&config.performance));
    Ok(Scanner::new(config, media)?)
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(value)?).await?;
    info!("💾 Results saved to: {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "loopscan=debug,info" } else { "loopscan=info,warn" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(&cli);
    let container = config.export.container.clone();

    match cli.command {
        Commands::Scan { source_root, rescan } => {
            if let Some(root) = source_root {
                config.paths.source_root = root;
            }
            let root = config.paths.source_root.clone();
            if !root.exists() {
                return Err(anyhow::anyhow!("Source root not found: {}", root.display()));
            }

            info!("🚀 Loopscan starting...");
            info!("{}", config.summary());

            let mut cache = CandidateCache::open(&config.paths.cache_dir).await?;
            let scanner = build_scanner(config)?;
            let summary = scanner.scan_archive(&root, &mut cache, rescan).await?;

            info!("✅ Scanned: {}", summary.scanned);
            info!("⏭️ Already cached: {}", summary.skipped_cached);
            info!("❌ Unreadable: {}", summary.unreadable.len());
            if !summary.duplicates.is_empty() {
                warn!("⚠️ Skipped {} recordings with duplicate source ids", summary.duplicates.len());
            }
            info!(
                "📊 {} chunks, {} frames, {} start points ({} degenerate)",
                summary.stats.chunks_scanned,
                summary.stats.frames_decoded,
                summary.stats.starts_scanned,
                summary.stats.degenerate_starts
            );
            info!("🎯 Cache now holds {} candidates", cache.candidates().len());
        }

        Commands::Cuts { source_root, output } => {
            if let Some(root) = source_root {
                config.paths.source_root = root;
            }
            let root = config.paths.source_root.clone();
            let scanner = build_scanner(config)?;
            let reports = scanner.scan_cuts_archive(&root).await?;

            let total_cuts: usize = reports.iter().map(|r| r.cuts.len()).sum();
            info!("✂️ {} cuts across {} sources", total_cuts, reports.len());
            write_json(&output, &reports).await?;
        }

        Commands::Select { output, top, exclude } => {
            config.validate()?;
            let cache = CandidateCache::open(&config.paths.cache_dir).await?;
            let candidates = cache.candidates().to_vec();
            info!("📚 {} cached candidates", candidates.len());

            let deduped = match exclude {
                Some(previous) => {
                    let existing = load_records(&previous).await?;
                    let set = select_new(&candidates, &existing, config.selection.min_separation);
                    info!("⏭️ {} new segments after excluding {} existing", set.len(), existing.len());
                    set
                }
                None => dedupe_per_source(&candidates, config.selection.min_separation),
            };
            let selection: SelectionSet = if top {
                select_top(&deduped.candidates, &RankPolicy::from(&config.selection))
            } else {
                deduped
            };

            info!("🎯 Selected {} segments", selection.len());
            selection.save(&output, &container).await?;
        }

        Commands::Recommend { clips, taste, n, output } => {
            let picks = n.unwrap_or(config.diversify.picks);
            let scanner = build_scanner(config)?;
            let recommendations = scanner.recommend(&clips, taste.as_deref(), picks).await?;

            for rec in recommendations.iter().take(10) {
                info!(
                    "  #{} {} score={:.3} interest={:.3} similarity={:.3}",
                    rec.rank, rec.id, rec.effective_score, rec.interest, rec.similarity
                );
            }
            write_json(&output, &recommendations).await?;
        }

        Commands::Export { results, output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| config.paths.output_dir.clone());
            let records = load_records(&results).await?;
            let scanner = build_scanner(config)?;
            let summary = scanner.export(&records, &output_dir).await?;
            if !summary.failed.is_empty() {
                warn!("⚠️ {} clips failed to export", summary.failed.len());
            }
        }

        Commands::Refine { results, margin, output } => {
            let records = load_records(&results).await?;
            let scanner = build_scanner(config)?;
            let refined = scanner.refine(&records, margin).await?;

            let improved = refined
                .iter()
                .zip(&records)
                .filter(|(c, r)| c.score < r.loop_score)
                .count();
            info!("🔧 Improved {} of {} segments", improved, records.len());

            SelectionSet { candidates: refined }.save(&output, &container).await?;
        }

        Commands::Config { save } => {
            config.validate()?;
            println!("{}", config.summary());
            if let Some(path) = save {
                config.save(&path)?;
            }
        }
    }

    Ok(())
}
