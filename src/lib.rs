/// Loopscan - bounded-memory loop and segment discovery over long recordings
///
/// Sources are sampled in overlapping chunks of small frames, frames become
/// feature vectors, and a search stage finds loop points or scene cuts.
/// Candidates are ranked, de-duplicated and cached per source so archive
/// scans can resume.

pub mod cache;
pub mod candidate;
pub mod config;
pub mod diversify;
pub mod error;
pub mod features;
pub mod frame;
pub mod media;
pub mod sampler;
pub mod scanner;
pub mod search;
pub mod selection;

// Re-export main types for easy access
pub use crate::cache::{CacheStats, CandidateCache, ScannedSource};
pub use crate::candidate::{Candidate, EngineMode, ScanStats, SelectionRecord, SkipReason};
pub use crate::config::{Config, ConfigBuilder, CutThreshold};
pub use crate::diversify::{diversified_select, DiversifiedPick, ImageMetrics, RankedClip, TasteProfile};
pub use crate::error::{MediaError, Result, ScanError};
pub use crate::features::{DescriptorExtractor, FeatureExtractor, FeatureKind, FeatureVector, PixelExtractor};
pub use crate::frame::{Frame, FrameChunk};
pub use crate::media::{DecodeOutcome, ExportParams, FfmpegService, MediaService, MediaSource};
pub use crate::sampler::{ChunkPlan, ChunkWindow, FrameSampler};
pub use crate::scanner::{ExportSummary, Recommendation, ScanOutcome, ScanSummary, Scanner};
pub use crate::search::{CutReport, LoopSearchParams, Segment};
pub use crate::selection::{dedupe_per_source, select_top, RankPolicy, SelectionSet};
