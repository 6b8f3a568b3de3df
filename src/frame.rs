/// Raster frames and the chunk container the sampler hands to the search stage
use image::RgbImage;

/// One downsampled RGB24 frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGB24, row-major
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), Self::byte_len(width, height));
        Self {
            width,
            height,
            data,
        }
    }

    /// A frame with every channel of every pixel set to `value`
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self::new(width, height, vec![value; Self::byte_len(width, height)])
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data.chunks_exact(3).map(|p| [p[0], p[1], p[2]])
    }

    /// Rec. 601 luma per pixel, 0-255
    pub fn luma(&self) -> Vec<f32> {
        self.pixels()
            .map(|[r, g, b]| r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114)
            .collect()
    }

    /// Converts a decoded image, downscaling so the width does not exceed `max_width`
    pub fn from_image(img: RgbImage, max_width: u32, max_height: u32) -> Self {
        let img = if img.width() > max_width {
            image::imageops::resize(
                &img,
                max_width,
                max_height,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        };
        let (width, height) = img.dimensions();
        Self::new(width, height, img.into_raw())
    }
}

/// Splits a raw rgb24 buffer into frames. Trailing partial frames are dropped.
pub fn split_frames(raw: &[u8], width: u32, height: u32) -> Vec<Frame> {
    let frame_size = Frame::byte_len(width, height);
    if frame_size == 0 {
        return Vec::new();
    }
    raw.chunks_exact(frame_size)
        .map(|bytes| Frame::new(width, height, bytes.to_vec()))
        .collect()
}

/// Consecutively sampled frames covering `[start, start + span)` of a source
#[derive(Debug)]
pub struct FrameChunk {
    pub start: f64,
    pub fps: f64,
    pub frames: Vec<Frame>,
}

impl FrameChunk {
    /// Builds a chunk, keeping at most `floor(span * fps)` frames
    pub fn new(start: f64, span: f64, fps: f64, mut frames: Vec<Frame>) -> Self {
        let expected = (span * fps + 1e-9).floor().max(0.0) as usize;
        frames.truncate(expected);
        Self { start, fps, frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Absolute source time of a frame index
    pub fn time_of(&self, index: usize) -> f64 {
        self.start + index as f64 / self.fps
    }

    /// Drops the pixel data. Called once candidates have been extracted.
    pub fn release(mut self) -> usize {
        let released = self.frames.len();
        self.frames.clear();
        self.frames.shrink_to_fit();
        released
    }
}
