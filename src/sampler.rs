/// Chunked frame sampling over a media source
use std::sync::Arc;
use tracing::debug;

use crate::config::SamplingConfig;
use crate::error::MediaError;
use crate::frame::{split_frames, Frame, FrameChunk};
use crate::media::{DecodeOutcome, MediaService, MediaSource};

/// One decode request of a full-source scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkWindow {
    /// Start of the decoded window
    pub start: f64,
    /// Seconds requested from the decoder (stride plus overlap, clamped to the end)
    pub request: f64,
    /// Start points are only taken from `[start, scan_end)`
    pub scan_end: f64,
}

impl ChunkWindow {
    pub fn scan_secs(&self) -> f64 {
        self.scan_end - self.start
    }
}

/// Iterator over the chunk windows covering `[0, duration)`
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    duration: f64,
    stride: f64,
    overlap: f64,
    index: u64,
}

impl ChunkPlan {
    pub fn new(duration: f64, stride: f64, overlap: f64) -> Self {
        Self {
            duration: duration.max(0.0),
            stride,
            overlap: overlap.max(0.0),
            index: 0,
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = ChunkWindow;

    fn next(&mut self) -> Option<ChunkWindow> {
        if self.stride <= 0.0 {
            return None;
        }
        // Window edges are index * stride
        let start = self.index as f64 * self.stride;
        if start >= self.duration {
            return None;
        }
        self.index += 1;

        Some(ChunkWindow {
            start,
            request: (self.stride + self.overlap).min(self.duration - start),
            scan_end: ((self.index) as f64 * self.stride).min(self.duration),
        })
    }
}

/// Samples downscaled frames from a source through a `MediaService`
#[derive(Clone)]
pub struct FrameSampler {
    media: Arc<dyn MediaService>,
    fps: f64,
    width: u32,
    height: u32,
}

impl FrameSampler {
    pub fn new(media: Arc<dyn MediaService>, fps: f64, width: u32, height: u32) -> Self {
        Self {
            media,
            fps,
            width,
            height,
        }
    }

    pub fn from_config(media: Arc<dyn MediaService>, sampling: &SamplingConfig) -> Self {
        Self::new(media, sampling.fps, sampling.width, sampling.height)
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Decode `[start, start + duration)`. An empty result means end of stream.
    pub async fn sample(
        &self,
        source: &MediaSource,
        start: f64,
        duration: f64,
    ) -> Result<Vec<Frame>, MediaError> {
        let outcome = self
            .media
            .decode_frames(&source.path, start, duration, self.fps, self.width, self.height)
            .await?;

        match outcome {
            DecodeOutcome::Frames(raw) => Ok(split_frames(&raw, self.width, self.height)),
            DecodeOutcome::Empty => {
                debug!("Empty decode for {} at {:.1}s", source.video_id, start);
                Ok(Vec::new())
            }
        }
    }

    /// Decode one planned window into a chunk
    pub async fn sample_chunk(
        &self,
        source: &MediaSource,
        window: &ChunkWindow,
    ) -> Result<FrameChunk, MediaError> {
        let frames = self.sample(source, window.start, window.request).await?;
        Ok(FrameChunk::new(window.start, window.request, self.fps, frames))
    }
}
