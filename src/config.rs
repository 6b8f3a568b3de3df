use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, ScanError};

/// Configuration for the loop/cut scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source, cache and output locations
    pub paths: PathsConfig,

    /// Frame sampling and chunking
    pub sampling: SamplingConfig,

    /// Loop-mode search settings
    pub loop_search: LoopSearchConfig,

    /// Cut-mode search settings
    pub cut_search: CutSearchConfig,

    /// Candidate de-duplication and top-N selection
    pub selection: SelectionConfig,

    /// Taste-based diversified ranking
    pub diversify: DiversifyConfig,

    /// Transcode settings for exported clips
    pub export: ExportConfig,

    /// Performance and resource settings
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the source recordings
    pub source_root: PathBuf,

    /// Directory for the candidate cache
    pub cache_dir: PathBuf,

    /// Directory for results and exported clips
    pub output_dir: PathBuf,

    /// Token handed to the upload collaborator, never used by the engine
    pub api_token: Option<String>,

    /// Source file extensions picked up during discovery
    pub supported_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Frames sampled per second of source
    pub fps: f64,

    /// Downsampled frame width
    pub width: u32,

    /// Downsampled frame height
    pub height: u32,

    /// Chunk stride in seconds
    pub chunk_secs: f64,

    /// Extra seconds decoded past each stride, must cover the longest loop
    pub overlap_margin: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSearchConfig {
    pub min_duration: f64,
    pub max_duration: f64,

    /// Stride between scanned start points in seconds
    pub step_secs: f64,

    /// Candidates scoring above this are discarded
    pub score_threshold: f64,

    /// Mean byte value under which a frame counts as black
    pub degenerate_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutSearchConfig {
    /// Sampling rate for cut detection (frames per second)
    pub fps: f64,

    pub threshold: CutThreshold,

    /// Minimum seconds between two accepted cuts
    pub min_gap: f64,

    /// Z-score feature dimensions before measuring distances
    pub standardize: bool,

    /// Cosine similarity a segment needs with the first segment of its group
    pub group_similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CutThreshold {
    /// Absolute distance threshold
    Fixed(f32),
    /// Percentile (0-100) of the source's adjacent distances
    Percentile(f32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Two picks from one source must start at least this far apart
    pub min_separation: f64,

    /// Cap on picks per source in the global selection
    pub max_per_source: usize,

    /// Number of clips in the global selection
    pub target_count: usize,

    /// Only candidates scoring below this enter the global selection
    pub max_score: f64,

    /// Only candidates more interesting than this enter the global selection
    pub min_interest: f64,

    /// Interest value treated as maximally interesting
    pub interest_ceiling: f64,

    pub score_weight: f64,
    pub interest_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversifyConfig {
    /// Scale `k` in `1 / (1 + k * min_distance)`
    pub taste_scale: f32,

    pub interest_weight: f32,
    pub similarity_weight: f32,

    /// Picks penalize remaining candidates closer than this
    pub similarity_cutoff: f32,

    /// Largest fraction of a candidate's score that penalties can remove
    pub max_penalty_fraction: f32,

    /// Posters wider than this are resized before analysis
    pub analysis_width: u32,
    pub analysis_height: u32,

    /// Number of picks
    pub picks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub video_codec: String,
    pub crf: u32,
    pub preset: String,
    pub pixel_format: String,
    pub container: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Sources scanned concurrently
    pub max_workers: usize,

    /// Timeout for ffprobe calls (seconds)
    pub probe_timeout_secs: u64,

    /// Timeout for one chunk decode (seconds)
    pub decode_timeout_secs: u64,

    /// Timeout for one clip transcode (seconds)
    pub transcode_timeout_secs: u64,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> anyhow::Result<Self> {
        let home_config = std::env::var("HOME")
            .map(|home| format!("{}/.config/loopscan/config.toml", home))
            .unwrap_or_default();
        let config_paths = ["loopscan.toml", "config/loopscan.toml", home_config.as_str()];

        for path in config_paths.iter().filter(|p| !p.is_empty()) {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Err(anyhow::anyhow!("No configuration file found"))
    }

    /// Load configuration from a specific TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("LOOPSCAN_SOURCE_ROOT") {
            self.paths.source_root = PathBuf::from(root);
        }

        if let Ok(cache_dir) = std::env::var("LOOPSCAN_CACHE_DIR") {
            self.paths.cache_dir = PathBuf::from(cache_dir);
        }

        if let Ok(output_dir) = std::env::var("LOOPSCAN_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(output_dir);
        }

        if let Ok(token) = std::env::var("LOOPSCAN_API_TOKEN") {
            self.paths.api_token = Some(token);
        }

        if let Ok(workers) = std::env::var("LOOPSCAN_WORKERS") {
            self.performance.max_workers = workers.parse().unwrap_or(self.performance.max_workers);
        }

        if let Ok(fps) = std::env::var("LOOPSCAN_SAMPLE_FPS") {
            self.sampling.fps = fps.parse().unwrap_or(self.sampling.fps);
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ScanError::InvalidConfig(msg.to_string()));

        if self.sampling.fps <= 0.0 || self.cut_search.fps <= 0.0 {
            return invalid("sampling rates must be greater than 0");
        }
        if self.sampling.width == 0 || self.sampling.height == 0 {
            return invalid("frame dimensions must be greater than 0");
        }
        if self.sampling.chunk_secs <= 0.0 {
            return invalid("chunk_secs must be greater than 0");
        }

        let loops = &self.loop_search;
        if loops.min_duration <= 0.0 || loops.min_duration > loops.max_duration {
            return invalid("loop durations must satisfy 0 < min_duration <= max_duration");
        }
        if self.sampling.overlap_margin < loops.max_duration {
            return invalid("overlap_margin must be at least max_duration");
        }
        if loops.step_secs <= 0.0 {
            return invalid("step_secs must be greater than 0");
        }

        if let CutThreshold::Percentile(p) = self.cut_search.threshold {
            if !(0.0..=100.0).contains(&p) {
                return invalid("cut percentile must be within 0..=100");
            }
        }
        if self.cut_search.min_gap < 0.0 {
            return invalid("min_gap must not be negative");
        }
        if !(-1.0..=1.0).contains(&self.cut_search.group_similarity) {
            return invalid("group_similarity must be within -1..=1");
        }

        let sel = &self.selection;
        if sel.max_score <= 0.0 || sel.interest_ceiling <= sel.min_interest {
            return invalid("selection normalisation bounds are empty");
        }
        if sel.max_per_source == 0 {
            return invalid("max_per_source must be greater than 0");
        }

        if self.diversify.similarity_cutoff <= 0.0
            || !(0.0..=1.0).contains(&self.diversify.max_penalty_fraction)
        {
            return invalid("similarity_cutoff must be positive and max_penalty_fraction within 0..=1");
        }

        if self.performance.max_workers == 0 {
            return invalid("max_workers must be greater than 0");
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Loopscan Configuration:\n\
            - Source Root: {}\n\
            - Cache Directory: {}\n\
            - Sampling: {} fps at {}x{}\n\
            - Chunks: {}s + {}s overlap\n\
            - Loop Duration: {}-{}s (step {}s, threshold {})\n\
            - Min Separation: {}s\n\
            - Workers: {}",
            self.paths.source_root.display(),
            self.paths.cache_dir.display(),
            self.sampling.fps,
            self.sampling.width,
            self.sampling.height,
            self.sampling.chunk_secs,
            self.sampling.overlap_margin,
            self.loop_search.min_duration,
            self.loop_search.max_duration,
            self.loop_search.step_secs,
            self.loop_search.score_threshold,
            self.selection.min_separation,
            self.performance.max_workers
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                source_root: PathBuf::from("./recordings"),
                cache_dir: PathBuf::from("./cache"),
                output_dir: PathBuf::from("./output"),
                api_token: None,
                supported_extensions: vec![
                    "mov".to_string(),
                    "mp4".to_string(),
                    "mkv".to_string(),
                    "webm".to_string(),
                    "m4v".to_string(),
                ],
            },
            sampling: SamplingConfig {
                fps: 3.0,
                width: 240,
                height: 68,
                chunk_secs: 30.0,
                overlap_margin: 16.0, // max_duration + 2
            },
            loop_search: LoopSearchConfig {
                min_duration: 6.0,
                max_duration: 14.0,
                step_secs: 5.0,
                score_threshold: 0.06,
                degenerate_threshold: 10.0,
            },
            cut_search: CutSearchConfig {
                fps: 1.0 / 3.0,
                threshold: CutThreshold::Percentile(85.0),
                min_gap: 10.0,
                standardize: true,
                group_similarity: 0.92,
            },
            selection: SelectionConfig {
                min_separation: 15.0,
                max_per_source: 8,
                target_count: 30,
                max_score: 0.03,
                min_interest: 30.0,
                interest_ceiling: 85.0,
                score_weight: 0.4,
                interest_weight: 0.6,
            },
            diversify: DiversifyConfig {
                taste_scale: 2.0,
                interest_weight: 0.6,
                similarity_weight: 0.4,
                similarity_cutoff: 0.3,
                max_penalty_fraction: 0.5,
                analysis_width: 384,
                analysis_height: 216,
                picks: 60,
            },
            export: ExportConfig {
                video_codec: "libx264".to_string(),
                crf: 18,
                preset: "medium".to_string(),
                pixel_format: "yuv420p".to_string(),
                container: "mp4".to_string(),
            },
            performance: PerformanceConfig {
                max_workers: num_cpus::get().min(4),
                probe_timeout_secs: 30,
                decode_timeout_secs: 300,
                transcode_timeout_secs: 900,
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_source_root(mut self, dir: PathBuf) -> Self {
        self.config.paths.source_root = dir;
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.cache_dir = dir;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.output_dir = dir;
        self
    }

    pub fn with_sampling(mut self, fps: f64, width: u32, height: u32) -> Self {
        self.config.sampling.fps = fps;
        self.config.sampling.width = width;
        self.config.sampling.height = height;
        self
    }

    pub fn with_chunking(mut self, chunk_secs: f64, overlap_margin: f64) -> Self {
        self.config.sampling.chunk_secs = chunk_secs;
        self.config.sampling.overlap_margin = overlap_margin;
        self
    }

    pub fn with_loop_durations(mut self, min_duration: f64, max_duration: f64) -> Self {
        self.config.loop_search.min_duration = min_duration;
        self.config.loop_search.max_duration = max_duration;
        self
    }

    pub fn with_step(mut self, step_secs: f64) -> Self {
        self.config.loop_search.step_secs = step_secs;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.config.loop_search.score_threshold = threshold;
        self
    }

    pub fn with_min_separation(mut self, seconds: f64) -> Self {
        self.config.selection.min_separation = seconds;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.performance.max_workers = workers;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
