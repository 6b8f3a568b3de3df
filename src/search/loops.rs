/// Loop-mode search: per start point, the nearest-looking end frame within span bounds
use tracing::trace;

use crate::candidate::{Candidate, ScanStats, SkipReason};
use crate::config::LoopSearchConfig;
use crate::features::{is_degenerate, visual_interest, FeatureExtractor, FeatureVector};
use crate::frame::{Frame, FrameChunk};

const SPAN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSearchParams {
    pub fps: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub step_secs: f64,
    /// Seconds at the head of the chunk where start points may lie; `None` scans the whole chunk
    pub scan_secs: Option<f64>,
    pub degenerate_threshold: f32,
}

impl LoopSearchParams {
    pub fn from_config(config: &LoopSearchConfig, fps: f64, scan_secs: Option<f64>) -> Self {
        Self {
            fps,
            min_duration: config.min_duration,
            max_duration: config.max_duration,
            step_secs: config.step_secs,
            scan_secs,
            degenerate_threshold: config.degenerate_threshold,
        }
    }

    /// Shortest span in frames whose duration is at least `min_duration`
    pub fn min_span(&self) -> usize {
        (self.min_duration * self.fps - SPAN_EPSILON).ceil().max(1.0) as usize
    }

    /// Longest span in frames whose duration is at most `max_duration`
    pub fn max_span(&self) -> usize {
        (self.max_duration * self.fps + SPAN_EPSILON).floor().max(0.0) as usize
    }

    pub fn step_frames(&self) -> usize {
        ((self.step_secs * self.fps + SPAN_EPSILON).floor() as usize).max(1)
    }
}

/// Best end frame found for one start frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopHit {
    pub start: usize,
    pub end: usize,
    pub score: f32,
    pub visual_interest: f32,
}

impl LoopHit {
    pub fn span(&self) -> usize {
        self.end - self.start
    }
}

/// Scan start points `0, step, 2*step, ...` and pick for each the end index in
/// `[start + min_span, start + max_span]` with the smallest distance to the
/// start frame. Ties go to the lowest end index.
///
/// Only the two endpoint frames are compared. A pair whose endpoints match
/// while the interior contains a hard cut still scores well.
pub fn find_loops(
    frames: &[Frame],
    vectors: &[FeatureVector],
    extractor: &dyn FeatureExtractor,
    params: &LoopSearchParams,
    stats: &mut ScanStats,
) -> Vec<LoopHit> {
    let n = frames.len().min(vectors.len());
    let min_span = params.min_span();
    let max_span = params.max_span();
    let step = params.step_frames();

    if n <= min_span || min_span > max_span {
        return Vec::new();
    }

    let head = params
        .scan_secs
        .map(|secs| (secs * params.fps + SPAN_EPSILON).floor() as usize)
        .unwrap_or(n);
    // Every start keeps at least one end frame inside the chunk
    let scan_limit = head.min(n - min_span);

    let mut hits = Vec::new();
    let mut start = 0;
    while start < scan_limit {
        stats.starts_scanned += 1;

        let mid = (start + min_span / 2).min(n - 1);
        if is_degenerate(&frames[mid], params.degenerate_threshold) {
            stats.record_skip(SkipReason::DegenerateFrame);
            start += step;
            continue;
        }

        let end_lo = start + min_span;
        let end_hi = (start + max_span).min(n - 1);

        let mut best_end = end_lo;
        let mut best_score = f32::INFINITY;
        for end in end_lo..=end_hi {
            let d = extractor.distance(&vectors[start], &vectors[end]);
            if d < best_score {
                best_score = d;
                best_end = end;
            }
        }

        let interest = visual_interest(&frames[(start + best_end) / 2]);
        trace!(start, best_end, best_score, "loop hit");
        hits.push(LoopHit {
            start,
            end: best_end,
            score: best_score,
            visual_interest: interest,
        });

        start += step;
    }

    hits
}

/// Run loop search over one chunk and convert hits to absolute-time candidates
pub fn search_chunk(
    chunk: &FrameChunk,
    video_id: &str,
    extractor: &dyn FeatureExtractor,
    params: &LoopSearchParams,
    stats: &mut ScanStats,
) -> Vec<Candidate> {
    let vectors: Vec<FeatureVector> = chunk.frames.iter().map(|f| extractor.extract(f)).collect();

    find_loops(&chunk.frames, &vectors, extractor, params, stats)
        .into_iter()
        .map(|hit| {
            let start_time = chunk.time_of(hit.start);
            let duration = hit.span() as f64 / params.fps;
            Candidate::new(video_id, start_time, start_time + duration, hit.score as f64)
                .with_interest(hit.visual_interest as f64)
        })
        .collect()
}

/// Best start/end pair in a short window around an anchor clip.
///
/// Starts are taken from the first quarter of the window and ends from the
/// last quarter; the single pair with the smallest distance wins.
pub fn best_loop_in_window(
    frames: &[Frame],
    extractor: &dyn FeatureExtractor,
    params: &LoopSearchParams,
) -> Option<LoopHit> {
    let n = frames.len();
    if n < 2 {
        return None;
    }
    let vectors: Vec<FeatureVector> = frames.iter().map(|f| extractor.extract(f)).collect();
    let min_span = params.min_span();
    let max_span = params.max_span().min(n - 1);
    let quarter = (n / 4).max(1);

    let mut best: Option<LoopHit> = None;
    for start in 0..quarter {
        for end in (n - quarter)..n {
            let span = end.saturating_sub(start);
            if end <= start || span < min_span || span > max_span {
                continue;
            }
            let score = extractor.distance(&vectors[start], &vectors[end]);
            if best.map_or(true, |b| score < b.score) {
                best = Some(LoopHit {
                    start,
                    end,
                    score,
                    visual_interest: 0.0,
                });
            }
        }
    }

    best.map(|mut hit| {
        hit.visual_interest = visual_interest(&frames[(hit.start + hit.end) / 2]);
        hit
    })
}
