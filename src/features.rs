//! Per-frame feature extraction.
//!
//! Two extractors exist. [`PixelExtractor`] keeps every normalised pixel and
//! compares frames by mean absolute difference, which is what loop search
//! uses. [`DescriptorExtractor`] summarises a frame into a small structured
//! descriptor (channel statistics, a 2x2 colour grid, texture scalars) for cut
//! detection and cross-clip similarity. Vectors carry the kind of extractor
//! that produced them and must not be compared across kinds.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Pixels,
    Descriptor,
}

impl FeatureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::Pixels => "pixel",
            FeatureKind::Descriptor => "descriptor",
        }
    }
}

/// Fixed-length numeric summary of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub kind: FeatureKind,
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(kind: FeatureKind, values: Vec<f32>) -> Self {
        Self { kind, values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn check_compatible(&self, other: &FeatureVector) -> Result<()> {
        if self.kind != other.kind || self.dim() != other.dim() {
            return Err(ScanError::IncompatibleFeatures {
                left: self.kind.name(),
                right: other.kind.name(),
            });
        }
        Ok(())
    }
}

/// Strategy turning frames into comparable vectors
pub trait FeatureExtractor: Send + Sync {
    fn kind(&self) -> FeatureKind;

    /// Pure and deterministic
    fn extract(&self, frame: &Frame) -> FeatureVector;

    /// Distance between two vectors produced by this extractor
    fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f32;

    fn try_distance(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f32> {
        a.check_compatible(b)?;
        if a.kind != self.kind() {
            return Err(ScanError::IncompatibleFeatures {
                left: a.kind.name(),
                right: self.kind().name(),
            });
        }
        Ok(self.distance(a, b))
    }
}

/// Flattened pixels scaled to [0, 1]; distance is the mean absolute difference
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelExtractor;

impl FeatureExtractor for PixelExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Pixels
    }

    fn extract(&self, frame: &Frame) -> FeatureVector {
        FeatureVector::new(
            FeatureKind::Pixels,
            frame.data.iter().map(|&b| b as f32 / 255.0).collect(),
        )
    }

    fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f32 {
        mean_abs_diff(&a.values, &b.values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

/// Structured colour/texture descriptor (30 values)
#[derive(Debug, Clone, Copy)]
pub struct DescriptorExtractor {
    pub metric: DistanceMetric,
}

impl DescriptorExtractor {
    pub const DIM: usize = 30;

    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl Default for DescriptorExtractor {
    fn default() -> Self {
        Self::new(DistanceMetric::Euclidean)
    }
}

impl FeatureExtractor for DescriptorExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Descriptor
    }

    fn extract(&self, frame: &Frame) -> FeatureVector {
        let mut values = Vec::with_capacity(Self::DIM);

        // Channel distribution: mean, std, p10, p90
        for channel in 0..3 {
            let mut samples: Vec<f32> = frame.data.iter().skip(channel).step_by(3).map(|&v| v as f32).collect();
            let (mean, std) = mean_std(&samples);
            samples.sort_by(|a, b| a.total_cmp(b));
            values.push(mean / 255.0);
            values.push(std / 255.0);
            values.push(percentile_sorted(&samples, 10.0) / 255.0);
            values.push(percentile_sorted(&samples, 90.0) / 255.0);
        }

        values.extend(quadrant_means(frame));

        let luma = frame.luma();
        let (w, h) = (frame.width as usize, frame.height as usize);

        values.push(histogram_entropy(&luma, 32) / (32f32).ln());

        let (dx, dy) = gradient_energy(&luma, w, h);
        values.push(dx / 255.0);
        values.push(dy / 255.0);
        values.push((dx + dy) / 255.0);

        let patch_vars = local_variances(&luma, w, h, 4);
        let (var_mean, var_std) = mean_std(&patch_vars);
        let scale = 255.0 * 255.0;
        values.push(var_mean / scale);
        values.push(var_std / scale);

        FeatureVector::new(FeatureKind::Descriptor, values)
    }

    fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> f32 {
        match self.metric {
            DistanceMetric::Euclidean => euclidean(&a.values, &b.values),
            DistanceMetric::Cosine => cosine_distance(&a.values, &b.values),
        }
    }
}

/// Near-black or blank frame: mean byte value below `threshold`
pub fn is_degenerate(frame: &Frame, threshold: f32) -> bool {
    if frame.data.is_empty() {
        return true;
    }
    let sum: u64 = frame.data.iter().map(|&b| b as u64).sum();
    (sum as f64 / frame.data.len() as f64) < threshold as f64
}

/// Standard deviation of every byte in the frame
pub fn visual_interest(frame: &Frame) -> f32 {
    let values: Vec<f32> = frame.data.iter().map(|&b| b as f32).collect();
    mean_std(&values).1
}

/// Z-score each dimension in place; zero-variance dimensions become 0
pub fn standardize(vectors: &mut [FeatureVector]) {
    let Some(dim) = vectors.first().map(|v| v.dim()) else {
        return;
    };
    for d in 0..dim {
        let column: Vec<f32> = vectors.iter().map(|v| v.values[d]).collect();
        let (mean, std) = mean_std(&column);
        for v in vectors.iter_mut() {
            v.values[d] = if std > f32::EPSILON { (v.values[d] - mean) / std } else { 0.0 };
        }
    }
}

pub fn mean_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let total: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs() as f64).sum();
    (total / a.len() as f64) as f32
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// 1 - cosine similarity; zero vectors are treated as maximally distant
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

/// Population mean and standard deviation
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

/// Linear-interpolated percentile of an ascending slice
pub fn percentile_sorted(sorted: &[f32], pct: f32) -> f32 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f32;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = rank - lo as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub fn percentile(values: &[f32], pct: f32) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, pct)
}

/// Mean RGB of each 2x2 grid cell, scaled to [0, 1] (12 values)
pub fn quadrant_means(frame: &Frame) -> Vec<f32> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let (mid_w, mid_h) = (w / 2, h / 2);
    let mut sums = [[0f64; 3]; 4];
    let mut counts = [0usize; 4];

    for (i, px) in frame.data.chunks_exact(3).enumerate() {
        let (x, y) = (i % w, i / w);
        let cell = (y >= mid_h) as usize * 2 + (x >= mid_w) as usize;
        counts[cell] += 1;
        for c in 0..3 {
            sums[cell][c] += px[c] as f64;
        }
    }

    let mut out = Vec::with_capacity(12);
    for cell in 0..4 {
        for c in 0..3 {
            let mean = if counts[cell] > 0 { sums[cell][c] / counts[cell] as f64 } else { 0.0 };
            out.push((mean / 255.0) as f32);
        }
    }
    out
}

fn histogram_entropy(values: &[f32], bins: usize) -> f32 {
    let mut hist = vec![1f32; bins]; // +1 smoothing avoids log(0)
    for &v in values {
        let idx = ((v / 256.0) * bins as f32) as usize;
        hist[idx.min(bins - 1)] += 1.0;
    }
    let total: f32 = hist.iter().sum();
    -hist.iter().map(|&c| c / total).map(|p| p * p.ln()).sum::<f32>()
}

/// Mean absolute horizontal and vertical luma differences
fn gradient_energy(luma: &[f32], w: usize, h: usize) -> (f32, f32) {
    let mut dx = 0f64;
    let mut dy = 0f64;
    for y in 0..h {
        for x in 0..w {
            let v = luma[y * w + x];
            if x + 1 < w {
                dx += (luma[y * w + x + 1] - v).abs() as f64;
            }
            if y + 1 < h {
                dy += (luma[(y + 1) * w + x] - v).abs() as f64;
            }
        }
    }
    let nx = (h * w.saturating_sub(1)).max(1) as f64;
    let ny = (w * h.saturating_sub(1)).max(1) as f64;
    ((dx / nx) as f32, (dy / ny) as f32)
}

/// Luma variance of each cell in a `grid` x `grid` partition
fn local_variances(luma: &[f32], w: usize, h: usize, grid: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(grid * grid);
    for gy in 0..grid {
        for gx in 0..grid {
            let (y0, y1) = (gy * h / grid, (gy + 1) * h / grid);
            let (x0, x1) = (gx * w / grid, (gx + 1) * w / grid);
            let patch: Vec<f32> = (y0..y1)
                .flat_map(|y| (x0..x1).map(move |x| y * w + x))
                .map(|i| luma[i])
                .collect();
            let (_, std) = mean_std(&patch);
            out.push(std * std);
        }
    }
    out
}
