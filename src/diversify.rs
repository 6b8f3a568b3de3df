//! Taste-based diversified ranking of whole clips.
//!
//! Each clip is summarised by [`ImageMetrics`] taken from a representative
//! frame. Its composite score mixes intrinsic interest with similarity to a
//! reference taste set. Picks are made greedily; every pick penalises the
//! remaining clips that look like it, so the final set stays varied.

use serde::{Deserialize, Serialize};

use crate::config::DiversifyConfig;
use crate::features::{euclidean, mean_std, percentile, quadrant_means};
use crate::frame::Frame;

const HUE_BINS: usize = 12;
const SATURATION_FLOOR: f32 = 0.1;

/// Visual interest metrics of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetrics {
    pub color_std: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub complexity: f32,
    pub color_diversity: f32,
    /// Mean RGB of each 2x2 grid cell, used for similarity
    pub quad_features: Vec<f32>,
}

impl ImageMetrics {
    pub fn analyze(frame: &Frame) -> Self {
        let (w, h) = (frame.width as usize, frame.height as usize);

        let color_std = (0..3)
            .map(|c| {
                let channel: Vec<f32> = frame.data.iter().skip(c).step_by(3).map(|&v| v as f32).collect();
                mean_std(&channel).1
            })
            .sum::<f32>()
            / 3.0;

        let brightness = if frame.data.is_empty() {
            0.0
        } else {
            frame.data.iter().map(|&v| v as f64).sum::<f64>() as f32 / frame.data.len() as f32 / 255.0
        };

        // Channel mean, not luma, as the grey level
        let gray: Vec<f32> = frame
            .pixels()
            .map(|[r, g, b]| (r as f32 + g as f32 + b as f32) / 3.0)
            .collect();
        let contrast = (percentile(&gray, 95.0) - percentile(&gray, 5.0)) / 255.0;

        let mut sat_sum = 0f64;
        let mut hues = Vec::new();
        for [r, g, b] in frame.pixels() {
            let (r, g, b) = (r as f32, g as f32, b as f32);
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            let sat = if max > 0.0 { (max - min) / max } else { 0.0 };
            sat_sum += sat as f64;
            if sat > SATURATION_FLOOR {
                hues.push((3f32.sqrt() * (g - b)).atan2(2.0 * r - g - b));
            }
        }
        let hue_hist = hue_histogram(&hues);
        let saturation = if frame.pixel_count() > 0 {
            (sat_sum / frame.pixel_count() as f64) as f32
        } else {
            0.0
        };

        let total: f32 = hue_hist.iter().sum();
        let color_diversity = -hue_hist
            .iter()
            .map(|&c| c / (total + 1e-8))
            .map(|p| p * (p + 1e-8).ln())
            .sum::<f32>();

        Self {
            color_std,
            brightness,
            contrast,
            saturation,
            complexity: gradient_magnitude(&gray, w, h) / 255.0,
            color_diversity,
            quad_features: quadrant_means(frame),
        }
    }

    /// Weighted intrinsic interest, each term bounded to [0, 1]
    pub fn interest(&self) -> f32 {
        let unit = |v: f32| v.clamp(0.0, 1.0);
        unit(self.contrast) * 0.20
            + unit(self.saturation) * 0.20
            + unit(self.complexity) * 0.15
            + unit(self.color_diversity / 2.5) * 0.15
            + unit(1.0 - (self.brightness - 0.4).abs() * 2.0) * 0.10
            + unit(self.color_std / 80.0) * 0.20
    }
}

/// Equal-width bins spanning the observed hue range, last bin closed.
/// A single distinct hue is centred in a unit-wide range.
fn hue_histogram(hues: &[f32]) -> [f32; HUE_BINS] {
    let mut hist = [0f32; HUE_BINS];
    let Some((lo, hi)) = hues.iter().fold(None, |range: Option<(f32, f32)>, &h| match range {
        None => Some((h, h)),
        Some((lo, hi)) => Some((lo.min(h), hi.max(h))),
    }) else {
        return hist;
    };
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };

    for &h in hues {
        let bin = ((h - lo) / (hi - lo) * HUE_BINS as f32) as usize;
        hist[bin.min(HUE_BINS - 1)] += 1.0;
    }
    hist
}

/// Mean gradient magnitude of a grey image
fn gradient_magnitude(gray: &[f32], w: usize, h: usize) -> f32 {
    if w < 2 || h < 2 {
        return 0.0;
    }
    let mut total = 0f64;
    for y in 0..h - 1 {
        for x in 0..w - 1 {
            let v = gray[y * w + x];
            let gx = gray[y * w + x + 1] - v;
            let gy = gray[(y + 1) * w + x] - v;
            total += ((gx * gx + gy * gy) as f64).sqrt();
        }
    }
    (total / ((w - 1) * (h - 1)) as f64) as f32
}

/// Reference descriptors of previously curated clips
#[derive(Debug, Clone, Default)]
pub struct TasteProfile {
    references: Vec<Vec<f32>>,
}

impl TasteProfile {
    pub fn new(references: Vec<Vec<f32>>) -> Self {
        Self { references }
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// `1 / (1 + k * d_min)`, or 0.5 with no references
    pub fn similarity(&self, descriptor: &[f32], scale: f32) -> f32 {
        self.references
            .iter()
            .map(|r| euclidean(descriptor, r))
            .min_by(|a, b| a.total_cmp(b))
            .map(|d| 1.0 / (1.0 + scale * d))
            .unwrap_or(0.5)
    }
}

/// A clip entering diversified selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClip {
    pub id: String,
    pub score: f32,
    pub interest: f32,
    pub similarity: f32,
    pub descriptor: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversifyParams {
    pub taste_scale: f32,
    pub interest_weight: f32,
    pub similarity_weight: f32,
    pub similarity_cutoff: f32,
    pub max_penalty_fraction: f32,
}

impl From<&DiversifyConfig> for DiversifyParams {
    fn from(config: &DiversifyConfig) -> Self {
        Self {
            taste_scale: config.taste_scale,
            interest_weight: config.interest_weight,
            similarity_weight: config.similarity_weight,
            similarity_cutoff: config.similarity_cutoff,
            max_penalty_fraction: config.max_penalty_fraction,
        }
    }
}

/// Score a clip from its metrics against the taste profile
pub fn score_clip(
    id: impl Into<String>,
    metrics: &ImageMetrics,
    taste: &TasteProfile,
    params: &DiversifyParams,
) -> RankedClip {
    let interest = metrics.interest();
    let similarity = taste.similarity(&metrics.quad_features, params.taste_scale);
    RankedClip {
        id: id.into(),
        score: interest * params.interest_weight + similarity * params.similarity_weight,
        interest,
        similarity,
        descriptor: metrics.quad_features.clone(),
    }
}

/// A pick with the effective score it had when chosen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversifiedPick {
    pub index: usize,
    pub id: String,
    pub score: f32,
    pub effective_score: f32,
    pub interest: f32,
    pub similarity: f32,
}

/// Greedy max-marginal-relevance selection of up to `n` clips.
///
/// After each pick, every remaining clip within `similarity_cutoff` of it
/// accrues `score * (cutoff - d) / cutoff` of penalty; the accumulated penalty
/// never exceeds `max_penalty_fraction * score`. Ties go to the lowest index.
pub fn diversified_select(clips: &[RankedClip], n: usize, params: &DiversifyParams) -> Vec<DiversifiedPick> {
    let mut penalties = vec![0f32; clips.len()];
    let mut taken = vec![false; clips.len()];
    let mut picks = Vec::with_capacity(n.min(clips.len()));

    let effective = |i: usize, penalties: &[f32]| {
        let cap = clips[i].score * params.max_penalty_fraction;
        clips[i].score - penalties[i].min(cap)
    };

    while picks.len() < n {
        let mut best: Option<(usize, f32)> = None;
        for i in (0..clips.len()).filter(|&i| !taken[i]) {
            let e = effective(i, &penalties);
            if best.map_or(true, |(_, b)| e > b) {
                best = Some((i, e));
            }
        }
        let Some((picked, effective_score)) = best else {
            break;
        };
        taken[picked] = true;

        for i in (0..clips.len()).filter(|&i| !taken[i]) {
            let d = euclidean(&clips[picked].descriptor, &clips[i].descriptor);
            if d < params.similarity_cutoff {
                penalties[i] += clips[i].score * (params.similarity_cutoff - d) / params.similarity_cutoff;
            }
        }

        let clip = &clips[picked];
        picks.push(DiversifiedPick {
            index: picked,
            id: clip.id.clone(),
            score: clip.score,
            effective_score,
            interest: clip.interest,
            similarity: clip.similarity,
        });
    }

    picks
}
