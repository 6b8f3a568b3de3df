/// Cut-mode search: adjacent-frame discontinuities with a minimum gap between
/// cuts, followed by grouping of visually similar consecutive segments
use serde::{Deserialize, Serialize};

use crate::config::{CutSearchConfig, CutThreshold};
use crate::features::{cosine_distance, percentile, standardize, FeatureExtractor, FeatureVector};
use crate::frame::FrameChunk;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutParams {
    pub threshold: CutThreshold,
    pub min_gap: f64,
    pub standardize: bool,
    /// Cosine similarity a segment needs with its group's first segment to join it
    pub group_similarity: f32,
}

impl CutParams {
    /// A fixed threshold on raw features needs no whole-source statistics,
    /// so cuts can be decided while samples stream through
    pub fn is_streaming(&self) -> bool {
        matches!(self.threshold, CutThreshold::Fixed(_)) && !self.standardize
    }
}

impl From<&CutSearchConfig> for CutParams {
    fn from(config: &CutSearchConfig) -> Self {
        Self {
            threshold: config.threshold,
            min_gap: config.min_gap,
            standardize: config.standardize,
            group_similarity: config.group_similarity,
        }
    }
}

/// Contiguous piece of a source between two cuts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

/// Run of consecutive segments that look alike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentGroup {
    pub start: f64,
    pub end: f64,
    /// Indices into the report's segments
    pub members: Vec<usize>,
    /// Member in the middle of the run
    pub representative: usize,
}

/// Cut detection result for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutReport {
    pub video_id: String,
    pub duration: f64,
    /// Distance threshold actually applied
    pub threshold: f32,
    pub cuts: Vec<f64>,
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub groups: Vec<SegmentGroup>,
}

/// Resolve a fixed or percentile threshold against the observed distances
pub fn resolve_threshold(threshold: CutThreshold, distances: &[f32]) -> f32 {
    match threshold {
        CutThreshold::Fixed(value) => value,
        CutThreshold::Percentile(pct) => percentile(distances, pct),
    }
}

/// `distances[i]` is the distance between samples `i` and `i + 1`. A cut is
/// placed at `times[i + 1]` when the distance exceeds `threshold` and the
/// previous cut is at least `min_gap` seconds earlier.
pub fn detect_cuts(times: &[f64], distances: &[f32], threshold: f32, min_gap: f64) -> Vec<f64> {
    let mut cuts: Vec<f64> = Vec::new();
    for (i, &d) in distances.iter().enumerate() {
        let Some(&t) = times.get(i + 1) else {
            break;
        };
        if accepts_cut(&cuts, t, d, threshold, min_gap) {
            cuts.push(t);
        }
    }
    cuts
}

fn accepts_cut(cuts: &[f64], t: f64, distance: f32, threshold: f32, min_gap: f64) -> bool {
    distance > threshold && cuts.last().map_or(true, |&last| t - last >= min_gap)
}

/// Partition `[0, duration)` at the given ascending cut times
pub fn segments_from_cuts(cuts: &[f64], duration: f64) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0.0;
    for &cut in cuts.iter().filter(|&&c| c > 0.0 && c < duration) {
        segments.push(Segment { start, end: cut });
        start = cut;
    }
    if duration > start {
        segments.push(Segment { start, end: duration });
    }
    segments
}

/// Group consecutive segments. A segment joins the open group when the cosine
/// similarity between its features and those of the group's first segment is
/// at least `min_similarity`; otherwise it opens a new group. Segments without
/// features always stand alone.
pub fn group_segments(segments: &[Segment], features: &[Option<Vec<f32>>], min_similarity: f32) -> Vec<SegmentGroup> {
    let mut groups: Vec<SegmentGroup> = Vec::new();
    let mut anchor: Option<&[f32]> = None;

    for (i, segment) in segments.iter().enumerate() {
        let current = features.get(i).and_then(|f| f.as_deref());
        let joins = match (anchor, current, groups.last()) {
            (Some(a), Some(c), Some(_)) => 1.0 - cosine_distance(a, c) >= min_similarity,
            _ => false,
        };

        match groups.last_mut() {
            Some(group) if joins => {
                group.members.push(i);
                group.end = segment.end;
            }
            _ => {
                groups.push(SegmentGroup {
                    start: segment.start,
                    end: segment.end,
                    members: vec![i],
                    representative: i,
                });
                anchor = current;
            }
        }
    }

    for group in &mut groups {
        group.representative = group.members[group.members.len() / 2];
    }
    groups
}

/// Running mean of the raw feature vectors of the open segment
#[derive(Debug, Default)]
struct SegmentMean {
    sum: Vec<f64>,
    count: usize,
}

impl SegmentMean {
    fn add(&mut self, values: &[f32]) {
        if self.sum.len() != values.len() {
            self.sum = vec![0.0; values.len()];
            self.count = 0;
        }
        for (s, &v) in self.sum.iter_mut().zip(values) {
            *s += v as f64;
        }
        self.count += 1;
    }

    fn take(&mut self) -> Option<Vec<f32>> {
        let count = std::mem::take(&mut self.count);
        let sum = std::mem::take(&mut self.sum);
        (count > 0).then(|| sum.into_iter().map(|s| (s / count as f64) as f32).collect())
    }
}

/// Decisions made while samples arrive, used when no whole-source statistics are needed
#[derive(Debug, Default)]
struct StreamState {
    previous: Option<FeatureVector>,
    cuts: Vec<f64>,
    means: Vec<Option<Vec<f32>>>,
    open: SegmentMean,
}

/// Consumes one feature vector per sampled frame while chunks stream through;
/// frames are released with their chunk.
///
/// With a fixed threshold on raw features only the previous vector and the
/// open segment's running mean are held. Otherwise every vector is kept until
/// `finish`, since the percentile threshold and standardization are computed
/// over the whole source.
pub struct CutAccumulator<'a> {
    extractor: &'a dyn FeatureExtractor,
    params: CutParams,
    samples: usize,
    times: Vec<f64>,
    vectors: Vec<FeatureVector>,
    stream: Option<StreamState>,
}

impl<'a> CutAccumulator<'a> {
    pub fn new(extractor: &'a dyn FeatureExtractor, params: CutParams) -> Self {
        Self {
            extractor,
            params,
            samples: 0,
            times: Vec::new(),
            vectors: Vec::new(),
            stream: params.is_streaming().then(StreamState::default),
        }
    }

    /// Add the frames of a chunk whose times fall in `[chunk.start, scan_end)`
    pub fn push_chunk(&mut self, chunk: &FrameChunk, scan_end: f64) {
        for (i, frame) in chunk.frames.iter().enumerate() {
            let t = chunk.time_of(i);
            if t >= scan_end {
                break;
            }
            let vector = self.extractor.extract(frame);
            self.push_sample(t, vector);
        }
    }

    fn push_sample(&mut self, t: f64, vector: FeatureVector) {
        self.samples += 1;
        let Some(state) = self.stream.as_mut() else {
            self.times.push(t);
            self.vectors.push(vector);
            return;
        };

        if let (Some(previous), CutThreshold::Fixed(threshold)) = (&state.previous, self.params.threshold) {
            let d = self.extractor.distance(previous, &vector);
            if accepts_cut(&state.cuts, t, d, threshold, self.params.min_gap) {
                state.cuts.push(t);
                state.means.push(state.open.take());
            }
        }
        state.open.add(&vector.values);
        state.previous = Some(vector);
    }

    pub fn len(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Vectors currently held in memory
    pub fn retained(&self) -> usize {
        match &self.stream {
            Some(state) => usize::from(state.previous.is_some()),
            None => self.vectors.len(),
        }
    }

    pub fn finish(self, video_id: &str, duration: f64) -> CutReport {
        let params = self.params;
        let (threshold, cuts, means) = match self.stream {
            Some(mut state) => {
                state.means.push(state.open.take());
                let threshold = resolve_threshold(params.threshold, &[]);
                (threshold, state.cuts, state.means)
            }
            None => {
                let distances = if params.standardize {
                    let mut scaled = self.vectors.clone();
                    standardize(&mut scaled);
                    adjacent_distances(self.extractor, &scaled)
                } else {
                    adjacent_distances(self.extractor, &self.vectors)
                };
                let threshold = resolve_threshold(params.threshold, &distances);
                let cuts = detect_cuts(&self.times, &distances, threshold, params.min_gap);
                let means = segment_means(&self.times, &self.vectors, &cuts);
                (threshold, cuts, means)
            }
        };

        let segments = segments_from_cuts(&cuts, duration);
        let groups = group_segments(&segments, &means, params.group_similarity);
        CutReport {
            video_id: video_id.to_string(),
            duration,
            threshold,
            cuts,
            segments,
            groups,
        }
    }
}

/// Mean raw feature vector of the samples between consecutive cuts
fn segment_means(times: &[f64], vectors: &[FeatureVector], cuts: &[f64]) -> Vec<Option<Vec<f32>>> {
    let mut means = Vec::with_capacity(cuts.len() + 1);
    let mut open = SegmentMean::default();
    let mut next = cuts.iter().peekable();

    for (&t, vector) in times.iter().zip(vectors) {
        while matches!(next.peek(), Some(&&cut) if t >= cut) {
            means.push(open.take());
            next.next();
        }
        open.add(&vector.values);
    }
    for _ in next {
        means.push(open.take());
    }
    means.push(open.take());
    means
}

pub fn adjacent_distances(extractor: &dyn FeatureExtractor, vectors: &[FeatureVector]) -> Vec<f32> {
    vectors
        .windows(2)
        .map(|pair| extractor.distance(&pair[0], &pair[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{DescriptorExtractor, PixelExtractor};
    use crate::frame::Frame;
    use proptest::prelude::*;

    /// Left half at `left`, right half at `right`
    fn split_frame(left: u8, right: u8) -> Frame {
        let (w, h) = (8u32, 8u32);
        let mut data = Vec::with_capacity(Frame::byte_len(w, h));
        for _y in 0..h {
            for x in 0..w {
                let v = if x < w / 2 { left } else { right };
                data.extend([v, v, v]);
            }
        }
        Frame::new(w, h, data)
    }

    fn fixed(threshold: f32, min_gap: f64) -> CutParams {
        CutParams {
            threshold: CutThreshold::Fixed(threshold),
            min_gap,
            standardize: false,
            group_similarity: 0.92,
        }
    }

    #[test]
    fn test_min_gap_is_enforced() {
        let times: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let distances = vec![0.9, 0.9, 0.1, 0.9, 0.1, 0.1, 0.9, 0.9, 0.1];
        let cuts = detect_cuts(&times, &distances, 0.5, 3.0);
        assert_eq!(cuts, vec![1.0, 4.0, 7.0]);
        for pair in cuts.windows(2) {
            assert!(pair[1] - pair[0] >= 3.0);
        }
    }

    #[test]
    fn test_percentile_threshold() {
        let distances: Vec<f32> = (0..=100).map(|i| i as f32).collect();
        let t = resolve_threshold(CutThreshold::Percentile(85.0), &distances);
        assert!((t - 85.0).abs() < 1e-4);
        assert_eq!(resolve_threshold(CutThreshold::Fixed(0.3), &distances), 0.3);
    }

    #[test]
    fn test_segments_partition_source() {
        let segments = segments_from_cuts(&[12.0, 30.0], 45.0);
        assert_eq!(
            segments,
            vec![
                Segment { start: 0.0, end: 12.0 },
                Segment { start: 12.0, end: 30.0 },
                Segment { start: 30.0, end: 45.0 },
            ]
        );
        assert_eq!(segments_from_cuts(&[], 5.0), vec![Segment { start: 0.0, end: 5.0 }]);
    }

    #[test]
    fn test_accumulator_finds_hard_cut_across_chunks() {
        // Dark scene for 6s, bright scene afterwards, sampled at 1fps in two chunks
        let frames: Vec<Frame> = (0..12)
            .map(|i| Frame::filled(8, 8, if i < 6 { 20 } else { 230 }))
            .collect();
        let first = FrameChunk::new(0.0, 5.0, 1.0, frames[..5].to_vec());
        let second = FrameChunk::new(5.0, 7.0, 1.0, frames[5..].to_vec());

        let extractor = PixelExtractor;
        let mut acc = CutAccumulator::new(&extractor, fixed(0.5, 2.0));
        acc.push_chunk(&first, 5.0);
        acc.push_chunk(&second, 12.0);
        assert_eq!(acc.len(), 12);

        let report = acc.finish("rec", 12.0);
        assert_eq!(report.cuts, vec![6.0]);
        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.threshold, 0.5);
    }

    #[test]
    fn test_descriptor_with_standardization() {
        let frames: Vec<Frame> = (0..8)
            .map(|i| Frame::filled(8, 8, if i < 4 { 40 } else { 210 }))
            .collect();
        let chunk = FrameChunk::new(0.0, 8.0, 1.0, frames);
        let extractor = DescriptorExtractor::default();
        let params = CutParams {
            threshold: CutThreshold::Percentile(85.0),
            min_gap: 1.0,
            standardize: true,
            group_similarity: 0.92,
        };
        let mut acc = CutAccumulator::new(&extractor, params);
        acc.push_chunk(&chunk, 8.0);
        assert_eq!(acc.retained(), 8);

        let report = acc.finish("rec", 8.0);
        assert_eq!(report.cuts, vec![4.0]);
        assert_eq!(report.groups.iter().map(|g| g.members.len()).sum::<usize>(), 2);
    }

    #[test]
    fn test_fixed_threshold_streams_with_one_vector() {
        let values = [20u8, 20, 230, 230, 230, 20, 20, 90, 90, 90, 90, 230];
        let frames: Vec<Frame> = values.iter().map(|&v| Frame::filled(8, 8, v)).collect();
        let extractor = PixelExtractor;
        let params = fixed(0.2, 2.0);
        assert!(params.is_streaming());

        let mut acc = CutAccumulator::new(&extractor, params);
        for (start, part) in frames.chunks(4).enumerate() {
            let t0 = start as f64 * 4.0;
            let chunk = FrameChunk::new(t0, 4.0, 1.0, part.to_vec());
            acc.push_chunk(&chunk, t0 + 4.0);
            assert!(acc.retained() <= 1);
        }
        assert_eq!(acc.len(), 12);

        // Same cuts as the whole-source pass over stored vectors
        let times: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let vectors: Vec<FeatureVector> = frames.iter().map(|f| extractor.extract(f)).collect();
        let expected = detect_cuts(&times, &adjacent_distances(&extractor, &vectors), 0.2, 2.0);

        let report = acc.finish("rec", 12.0);
        assert_eq!(report.cuts, expected);
        assert_eq!(report.cuts, vec![2.0, 5.0, 7.0, 11.0]);
        assert_eq!(report.segments.len(), 5);
    }

    #[test]
    fn test_similar_consecutive_segments_are_grouped() {
        // Two takes of the same framing, then the framing flips
        let frames: Vec<Frame> = (0..12)
            .map(|i| match i {
                0..=3 => split_frame(20, 230),
                4..=7 => split_frame(40, 250),
                _ => split_frame(230, 20),
            })
            .collect();
        let chunk = FrameChunk::new(0.0, 12.0, 1.0, frames);
        let extractor = PixelExtractor;
        let mut acc = CutAccumulator::new(&extractor, fixed(0.05, 1.0));
        acc.push_chunk(&chunk, 12.0);

        let report = acc.finish("rec", 12.0);
        assert_eq!(report.cuts, vec![4.0, 8.0]);
        assert_eq!(
            report.groups,
            vec![
                SegmentGroup {
                    start: 0.0,
                    end: 8.0,
                    members: vec![0, 1],
                    representative: 1,
                },
                SegmentGroup {
                    start: 8.0,
                    end: 12.0,
                    members: vec![2],
                    representative: 2,
                },
            ]
        );
    }

    #[test]
    fn test_grouping_compares_against_first_member() {
        let segments = segments_from_cuts(&[1.0, 2.0, 3.0], 4.0);
        let features = vec![
            Some(vec![1.0, 0.0]),
            Some(vec![0.95, 0.31]),
            // Close to the previous segment but not to the group's first
            Some(vec![0.8, 0.6]),
            None,
        ];
        let groups = group_segments(&segments, &features, 0.92);
        let members: Vec<Vec<usize>> = groups.iter().map(|g| g.members.clone()).collect();
        assert_eq!(members, vec![vec![0, 1], vec![2], vec![3]]);
        assert_eq!(groups[0].representative, 1);
        assert_eq!((groups[0].start, groups[0].end), (0.0, 2.0));
    }

    #[test]
    fn test_segment_means_follow_cuts() {
        let times = [0.0, 1.0, 2.0, 3.0];
        let vectors: Vec<FeatureVector> = [2.0f32, 4.0, 10.0, 20.0]
            .iter()
            .map(|&v| FeatureVector::new(crate::features::FeatureKind::Descriptor, vec![v]))
            .collect();
        let means = segment_means(&times, &vectors, &[2.0]);
        assert_eq!(means, vec![Some(vec![3.0]), Some(vec![15.0])]);
    }

    proptest! {
        #[test]
        fn accepted_cuts_respect_min_gap(
            steps in prop::collection::vec(0.05f64..5.0, 2..200),
            seed_distances in prop::collection::vec(0.0f32..1.0, 200),
            threshold in 0.0f32..1.0,
            min_gap in 0.0f64..20.0,
        ) {
            let times: Vec<f64> = steps
                .iter()
                .scan(0.0, |t, step| {
                    let current = *t;
                    *t += step;
                    Some(current)
                })
                .collect();
            let distances = &seed_distances[..times.len() - 1];
            let cuts = detect_cuts(&times, distances, threshold, min_gap);

            for pair in cuts.windows(2) {
                prop_assert!(pair[1] - pair[0] >= min_gap);
            }
            for cut in &cuts {
                let i = times.iter().position(|t| t == cut).unwrap();
                prop_assert!(i > 0);
                prop_assert!(distances[i - 1] > threshold);
            }

            let duration = times.last().unwrap() + 1.0;
            let segments = segments_from_cuts(&cuts, duration);
            prop_assert_eq!(segments.len(), cuts.len() + 1);
            prop_assert_eq!(segments[0].start, 0.0);
            prop_assert_eq!(segments.last().unwrap().end, duration);
        }
    }
}
