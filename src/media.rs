use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{ExportConfig, PerformanceConfig};
use crate::error::MediaError;

/// Immutable handle to a probed source recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSource {
    pub path: PathBuf,
    pub video_id: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

impl MediaSource {
    pub fn new(path: PathBuf, duration: f64, width: u32, height: u32) -> Self {
        Self {
            video_id: video_id_for(&path),
            path,
            duration,
            width,
            height,
        }
    }
}

/// Stable identifier for a source: file stem with spaces replaced by underscores
pub fn video_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(' ', "_"))
        .unwrap_or_default()
}

/// Outcome of a frame decode request
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Raw rgb24 frames, length a multiple of `width * height * 3`
    Frames(Vec<u8>),
    /// Nothing decodable in the requested window
    Empty,
}

/// Codec settings for a clip transcode
#[derive(Debug, Clone)]
pub struct ExportParams {
    pub video_codec: String,
    pub crf: u32,
    pub preset: String,
    pub pixel_format: String,
}

impl From<&ExportConfig> for ExportParams {
    fn from(config: &ExportConfig) -> Self {
        Self {
            video_codec: config.video_codec.clone(),
            crf: config.crf,
            preset: config.preset.clone(),
            pixel_format: config.pixel_format.clone(),
        }
    }
}

/// Frame extraction and transcoding capability
#[async_trait]
pub trait MediaService: Send + Sync {
    /// Resolve duration and native resolution of a source
    async fn probe(&self, path: &Path) -> Result<MediaSource, MediaError>;

    /// Decode `duration` seconds from `start` at `fps`, scaled to `width`x`height`
    async fn decode_frames(
        &self,
        path: &Path,
        start: f64,
        duration: f64,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<DecodeOutcome, MediaError>;

    /// Transcode `[start, start + duration)` of a source into `output`
    async fn transcode(
        &self,
        path: &Path,
        start: f64,
        duration: f64,
        params: &ExportParams,
        output: &Path,
    ) -> Result<PathBuf, MediaError>;
}

/// `MediaService` backed by the ffprobe and ffmpeg command line tools
#[derive(Clone)]
pub struct FfmpegService {
    probe_timeout: Duration,
    decode_timeout: Duration,
    transcode_timeout: Duration,
}

impl FfmpegService {
    pub fn new(performance: &PerformanceConfig) -> Self {
        Self {
            probe_timeout: Duration::from_secs(performance.probe_timeout_secs),
            decode_timeout: Duration::from_secs(performance.decode_timeout_secs),
            transcode_timeout: Duration::from_secs(performance.transcode_timeout_secs),
        }
    }

    async fn run(
        tool: &'static str,
        args: Vec<String>,
        limit: Duration,
    ) -> Result<Output, MediaError> {
        let mut command = tokio::process::Command::new(tool);
        command.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| MediaError::Timeout { tool, after: limit })??;

        if !output.status.success() {
            return Err(MediaError::Failed {
                tool,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::new(&crate::config::Config::default().performance)
    }
}

#[async_trait]
impl MediaService for FfmpegService {
    async fn probe(&self, path: &Path) -> Result<MediaSource, MediaError> {
        let output = Self::run(
            "ffprobe",
            vec![
                "-v".into(),
                "quiet".into(),
                "-print_format".into(),
                "json".into(),
                "-show_format".into(),
                "-show_streams".into(),
                "-select_streams".into(),
                "v:0".into(),
                path.to_string_lossy().into_owned(),
            ],
            self.probe_timeout,
        )
        .await?;

        let source = parse_probe(path, &output.stdout)?;
        info!(
            "📹 Probed source: {} ({}x{}, {:.1}s)",
            source.video_id, source.width, source.height, source.duration
        );
        Ok(source)
    }

    async fn decode_frames(
        &self,
        path: &Path,
        start: f64,
        duration: f64,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<DecodeOutcome, MediaError> {
        let output = Self::run(
            "ffmpeg",
            vec![
                "-v".into(),
                "quiet".into(),
                "-ss".into(),
                format!("{:.3}", start),
                "-i".into(),
                path.to_string_lossy().into_owned(),
                "-t".into(),
                format!("{:.3}", duration),
                "-vf".into(),
                format!("fps={},scale={}:{}", fps, width, height),
                "-pix_fmt".into(),
                "rgb24".into(),
                "-f".into(),
                "rawvideo".into(),
                "pipe:1".into(),
            ],
            self.decode_timeout,
        )
        .await?;

        let frame_size = width as usize * height as usize * 3;
        let usable = if frame_size == 0 {
            0
        } else {
            output.stdout.len() / frame_size * frame_size
        };
        debug!(
            "Decoded {} frames at {:.1}s from {}",
            usable / frame_size.max(1),
            start,
            path.display()
        );

        if usable == 0 {
            return Ok(DecodeOutcome::Empty);
        }
        let mut raw = output.stdout;
        raw.truncate(usable);
        Ok(DecodeOutcome::Frames(raw))
    }

    async fn transcode(
        &self,
        path: &Path,
        start: f64,
        duration: f64,
        params: &ExportParams,
        output: &Path,
    ) -> Result<PathBuf, MediaError> {
        Self::run(
            "ffmpeg",
            vec![
                "-y".into(),
                "-v".into(),
                "quiet".into(),
                "-ss".into(),
                format!("{:.3}", start),
                "-t".into(),
                format!("{:.3}", duration),
                "-i".into(),
                path.to_string_lossy().into_owned(),
                "-c:v".into(),
                params.video_codec.clone(),
                "-crf".into(),
                params.crf.to_string(),
                "-preset".into(),
                params.preset.clone(),
                "-pix_fmt".into(),
                params.pixel_format.clone(),
                "-an".into(),
                output.to_string_lossy().into_owned(),
            ],
            self.transcode_timeout,
        )
        .await?;

        info!("✅ Exported clip: {}", output.display());
        Ok(output.to_path_buf())
    }
}

fn parse_probe(path: &Path, stdout: &[u8]) -> Result<MediaSource, MediaError> {
    let parse_err = |message: String| MediaError::Parse {
        tool: "ffprobe",
        message,
    };

    let data: serde_json::Value =
        serde_json::from_slice(stdout).map_err(|e| parse_err(e.to_string()))?;

    let duration: f64 = data["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_err("missing format duration".to_string()))?;

    let stream = data["streams"]
        .as_array()
        .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
        .ok_or_else(|| parse_err("no video stream found".to_string()))?;

    Ok(MediaSource::new(
        path.to_path_buf(),
        duration,
        stream["width"].as_u64().unwrap_or(0) as u32,
        stream["height"].as_u64().unwrap_or(0) as u32,
    ))
}

/// Discover all source recordings under a directory, sorted by path
pub fn discover_sources(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut sources: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext.to_lowercase()))
                .unwrap_or(false)
        })
        .collect();

    sources.sort();
    sources
}

/// Split sorted source paths into one path per source identifier and the
/// later paths whose identifier is already taken
pub fn unique_sources(paths: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut seen = HashSet::new();
    let (unique, shadowed): (Vec<PathBuf>, Vec<PathBuf>) =
        paths.into_iter().partition(|path| seen.insert(video_id_for(path)));
    (unique, shadowed)
}
