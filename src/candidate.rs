use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which search the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Similar start/end frame pairs within span bounds
    Loop,
    /// Large adjacent-frame discontinuities
    Cut,
    /// Whole-clip ranking against a taste set
    DiversifiedRank,
}

/// A discovered loop segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub video_id: String,

    #[serde(rename = "loop_start")]
    pub start_time: f64,

    #[serde(rename = "loop_end")]
    pub end_time: f64,

    #[serde(rename = "loop_duration")]
    pub duration: f64,

    /// Endpoint distance, lower is a better loop
    #[serde(rename = "loop_score")]
    pub score: f64,

    /// Pixel standard deviation at the segment midpoint
    #[serde(default)]
    pub visual_interest: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl Candidate {
    pub fn new(video_id: impl Into<String>, start_time: f64, end_time: f64, score: f64) -> Self {
        Self {
            video_id: video_id.into(),
            start_time,
            end_time,
            duration: end_time - start_time,
            score,
            visual_interest: 0.0,
            source_path: None,
        }
    }

    pub fn with_interest(mut self, visual_interest: f64) -> Self {
        self.visual_interest = visual_interest;
        self
    }

    pub fn with_source(mut self, path: PathBuf) -> Self {
        self.source_path = Some(path);
        self
    }

    /// Exported clip name, e.g. `2026-02-14_19-17-30_t0015_loop.mp4`
    pub fn output_file(&self, container: &str) -> String {
        format!(
            "{}_t{:04}_loop.{}",
            self.video_id,
            self.start_time.max(0.0) as u64,
            container
        )
    }
}

/// One entry of the selection/results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub video_id: String,
    pub loop_start: f64,
    pub loop_end: f64,
    pub loop_duration: f64,
    pub loop_score: f64,
    pub visual_interest: f64,
    pub output_file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl SelectionRecord {
    pub fn from_candidate(candidate: &Candidate, container: &str) -> Self {
        Self {
            video_id: candidate.video_id.clone(),
            loop_start: candidate.start_time,
            loop_end: candidate.end_time,
            loop_duration: candidate.duration,
            loop_score: candidate.score,
            visual_interest: candidate.visual_interest,
            output_file: candidate.output_file(container),
            source_path: candidate.source_path.clone(),
        }
    }
}

/// Why part of a source was passed over without producing candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// Decoder returned nothing for the window; ends the source scan
    EmptyChunk,
    /// Chunk shorter than the minimum loop span
    InsufficientFrames,
    /// Near-black midpoint at a start index
    DegenerateFrame,
}

/// Per-source bookkeeping for one scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub chunks_scanned: usize,
    pub frames_decoded: usize,
    pub starts_scanned: usize,
    pub empty_chunks: usize,
    pub short_chunks: usize,
    pub degenerate_starts: usize,
}

impl ScanStats {
    pub fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::EmptyChunk => self.empty_chunks += 1,
            SkipReason::InsufficientFrames => self.short_chunks += 1,
            SkipReason::DegenerateFrame => self.degenerate_starts += 1,
        }
    }

    pub fn merge(&mut self, other: &ScanStats) {
        self.chunks_scanned += other.chunks_scanned;
        self.frames_decoded += other.frames_decoded;
        self.starts_scanned += other.starts_scanned;
        self.empty_chunks += other.empty_chunks;
        self.short_chunks += other.short_chunks;
        self.degenerate_starts += other.degenerate_starts;
    }
}
