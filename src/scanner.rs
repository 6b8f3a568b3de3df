use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::cache::CandidateCache;
use crate::candidate::{Candidate, EngineMode, ScanStats, SelectionRecord, SkipReason};
use crate::config::Config;
use crate::diversify::{diversified_select, score_clip, DiversifiedPick, DiversifyParams, ImageMetrics, TasteProfile};
use crate::error::{MediaError, Result, ScanError};
use crate::features::{DescriptorExtractor, FeatureExtractor, PixelExtractor};
use crate::frame::Frame;
use crate::media::{discover_sources, unique_sources, video_id_for, ExportParams, MediaService, MediaSource};
use crate::sampler::{ChunkPlan, FrameSampler};
use crate::search::{best_loop_in_window, search_chunk, CutAccumulator, CutParams, CutReport, LoopSearchParams};
use crate::selection::filter_by_score;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Loop-mode result for a single source
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub source: MediaSource,
    pub candidates: Vec<Candidate>,
    pub stats: ScanStats,
    pub elapsed: Duration,
}

/// Overall archive scan results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_sources: usize,
    pub scanned: usize,
    pub skipped_cached: usize,
    pub unreadable: Vec<PathBuf>,
    /// Paths skipped because an earlier path has the same source identifier
    pub duplicates: Vec<PathBuf>,
    pub new_candidates: usize,
    pub stats: ScanStats,
    pub total_time: Duration,
}

/// One ranked entry of a recommendation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub rank: usize,
    pub id: String,
    pub path: PathBuf,
    pub score: f32,
    pub effective_score: f32,
    pub interest: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub exported: Vec<PathBuf>,
    pub already_present: usize,
    pub failed: Vec<String>,
}

/// Drives the engine over sources: sampling, feature extraction and search,
/// with sources processed concurrently under a worker limit
#[derive(Clone)]
pub struct Scanner {
    config: Arc<Config>,
    media: Arc<dyn MediaService>,
    loop_extractor: Arc<dyn FeatureExtractor>,
    cut_extractor: Arc<dyn FeatureExtractor>,
    worker_semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl Scanner {
    pub fn new(config: Config, media: Arc<dyn MediaService>) -> Result<Self> {
        config.validate()?;
        let max_workers = config.performance.max_workers;
        info!("🔧 Initializing Scanner with {} workers", max_workers);

        Ok(Self {
            config: Arc::new(config),
            media,
            loop_extractor: Arc::new(PixelExtractor),
            cut_extractor: Arc::new(DescriptorExtractor::default()),
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        })
    }

    /// Replace the extractor used for a mode
    pub fn with_extractor(mut self, mode: EngineMode, extractor: Arc<dyn FeatureExtractor>) -> Self {
        match mode {
            EngineMode::Loop => self.loop_extractor = extractor,
            EngineMode::Cut => self.cut_extractor = extractor,
            EngineMode::DiversifiedRank => {
                warn!("Diversified ranking uses image metrics; extractor ignored")
            }
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn probe(&self, path: &Path) -> Result<MediaSource> {
        self.media
            .probe(path)
            .await
            .map_err(|e| ScanError::unreadable(path, e))
    }

    /// Loop-mode scan of one source, chunk by chunk.
    ///
    /// Each chunk is decoded, searched and released before the next one is
    /// requested, so memory stays bounded by one chunk regardless of duration.
    pub async fn scan_source(&self, path: &Path) -> Result<ScanOutcome> {
        let start_time = Instant::now();
        let source = self.probe(path).await?;
        let sampling = &self.config.sampling;
        let loops = &self.config.loop_search;

        let sampler = FrameSampler::from_config(Arc::clone(&self.media), sampling);
        let base = LoopSearchParams::from_config(loops, sampler.fps(), None);
        let min_span = base.min_span();

        debug!(
            "📊 Scanning {} ({:.1}s) in {}s chunks",
            source.video_id, source.duration, sampling.chunk_secs
        );

        let mut stats = ScanStats::default();
        let mut candidates = Vec::new();

        for window in ChunkPlan::new(source.duration, sampling.chunk_secs, sampling.overlap_margin) {
            if window.request < loops.min_duration {
                debug!("Skipping {:.1}s tail of {}", window.request, source.video_id);
                stats.record_skip(SkipReason::InsufficientFrames);
                continue;
            }

            let chunk = sampler
                .sample_chunk(&source, &window)
                .await
                .map_err(|e| ScanError::unreadable(&source.path, e))?;

            if chunk.is_empty() {
                debug!("End of stream for {} at {:.1}s", source.video_id, window.start);
                stats.record_skip(SkipReason::EmptyChunk);
                break;
            }
            stats.chunks_scanned += 1;
            stats.frames_decoded += chunk.len();

            if chunk.len() <= min_span {
                debug!(
                    "Chunk at {:.1}s of {} has {} frames, need more than {}",
                    window.start,
                    source.video_id,
                    chunk.len(),
                    min_span
                );
                stats.record_skip(SkipReason::InsufficientFrames);
                chunk.release();
                continue;
            }

            let params = LoopSearchParams {
                scan_secs: Some(window.scan_secs()),
                ..base
            };
            candidates.extend(search_chunk(
                &chunk,
                &source.video_id,
                self.loop_extractor.as_ref(),
                &params,
                &mut stats,
            ));
            chunk.release();
        }

        let candidates: Vec<Candidate> = filter_by_score(candidates, loops.score_threshold)
            .into_iter()
            .map(|c| c.with_source(source.path.clone()))
            .collect();

        Ok(ScanOutcome {
            source,
            candidates,
            stats,
            elapsed: start_time.elapsed(),
        })
    }

    /// Loop-mode scan of every source under `root`, resuming from the cache.
    /// Completed sources are written to the cache as soon as they finish.
    pub async fn scan_archive(&self, root: &Path, cache: &mut CandidateCache, rescan: bool) -> Result<ScanSummary> {
        let start_time = Instant::now();
        info!("🚀 Starting loop scan...");
        info!("📁 Source root: {}", root.display());

        let (sources, duplicates) = unique_sources(discover_sources(root, &self.config.paths.supported_extensions));
        for path in &duplicates {
            warn!(
                "⚠️ Skipping {}: source id {} is already taken by another recording",
                path.display(),
                video_id_for(path)
            );
        }
        let mut summary = ScanSummary {
            total_sources: sources.len() + duplicates.len(),
            duplicates,
            ..ScanSummary::default()
        };

        if sources.is_empty() {
            warn!("No sources found in {}", root.display());
            summary.total_time = start_time.elapsed();
            return Ok(summary);
        }

        let mut pending = Vec::new();
        for path in sources {
            let video_id = video_id_for(&path);
            if !rescan && cache.is_scanned(&video_id) {
                if cache.is_current(&video_id, &path).await {
                    debug!("⏭️ Already scanned: {}", video_id);
                    summary.skipped_cached += 1;
                    continue;
                }
                info!("🔄 Source changed since last scan: {}", video_id);
            }
            pending.push(path);
        }

        info!(
            "📹 Found {} sources ({} duplicate ids), {} already scanned, {} to scan",
            summary.total_sources,
            summary.duplicates.len(),
            summary.skipped_cached,
            pending.len()
        );

        let (tx, mut rx) = mpsc::channel(self.max_workers);
        let total_pending = pending.len();

        for (index, path) in pending.into_iter().enumerate() {
            let scanner = self.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                info!("📹 Scanning source {}/{}: {}", index + 1, total_pending, path.display());

                let result = scanner.scan_source(&path).await;
                if let Err(e) = tx.send((path, result)).await {
                    error!("Failed to send scan result: {}", e);
                }
            });
        }

        drop(tx);

        // Single writer: only this loop touches the cache
        while let Some((path, result)) = rx.recv().await {
            match result {
                Ok(outcome) => {
                    info!(
                        "✅ Completed: {} in {:.2}s, {} candidates",
                        outcome.source.video_id,
                        outcome.elapsed.as_secs_f64(),
                        outcome.candidates.len()
                    );
                    summary.scanned += 1;
                    summary.new_candidates += outcome.candidates.len();
                    summary.stats.merge(&outcome.stats);
                    cache
                        .record_source(&outcome.source, outcome.candidates, outcome.stats)
                        .await?;
                }
                Err(e) => {
                    warn!("❌ Skipping {}: {}", path.display(), e);
                    summary.unreadable.push(path);
                }
            }
        }

        summary.total_time = start_time.elapsed();
        info!(
            "🎉 Scan finished in {:.1}s: {} scanned, {} unreadable, {} new candidates",
            summary.total_time.as_secs_f64(),
            summary.scanned,
            summary.unreadable.len(),
            summary.new_candidates
        );
        Ok(summary)
    }

    /// Cut-mode scan of one source
    pub async fn scan_cuts(&self, path: &Path) -> Result<CutReport> {
        let source = self.probe(path).await?;
        let sampling = &self.config.sampling;
        let cut_config = &self.config.cut_search;
        let sampler = FrameSampler::new(
            Arc::clone(&self.media),
            cut_config.fps,
            sampling.width,
            sampling.height,
        );

        let mut acc = CutAccumulator::new(self.cut_extractor.as_ref(), CutParams::from(cut_config));
        for window in ChunkPlan::new(source.duration, sampling.chunk_secs, 0.0) {
            let chunk = sampler
                .sample_chunk(&source, &window)
                .await
                .map_err(|e| ScanError::unreadable(&source.path, e))?;
            if chunk.is_empty() {
                break;
            }
            acc.push_chunk(&chunk, window.scan_end);
            chunk.release();
        }

        debug!("Collected {} cut samples for {}", acc.len(), source.video_id);
        let report = acc.finish(&source.video_id, source.duration);
        info!(
            "✂️ {}: {} cuts, {} segments in {} groups (threshold {:.3})",
            report.video_id,
            report.cuts.len(),
            report.segments.len(),
            report.groups.len(),
            report.threshold
        );
        Ok(report)
    }

    /// Cut-mode scan of every source under `root`; unreadable sources are skipped
    pub async fn scan_cuts_archive(&self, root: &Path) -> Result<Vec<CutReport>> {
        let sources = discover_sources(root, &self.config.paths.supported_extensions);
        info!("📹 Detecting cuts in {} sources", sources.len());

        let mut reports: Vec<CutReport> = stream::iter(sources)
            .map(|path| async move {
                let result = self.scan_cuts(&path).await;
                (path, result)
            })
            .buffer_unordered(self.max_workers)
            .filter_map(|(path, result)| async move {
                match result {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!("❌ Skipping {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect()
            .await;

        reports.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        Ok(reports)
    }

    /// One representative frame of a clip: the decoded image for posters,
    /// the midpoint frame for videos
    pub async fn representative_frame(&self, path: &Path) -> Result<Frame> {
        let diversify = &self.config.diversify;
        let (max_w, max_h) = (diversify.analysis_width, diversify.analysis_height);

        if is_image(path) {
            let owned = path.to_path_buf();
            let image = tokio::task::spawn_blocking(move || image::open(owned))
                .await
                .map_err(|e| ScanError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
            return Ok(Frame::from_image(image.to_rgb8(), max_w, max_h));
        }

        let source = self.probe(path).await?;
        let sampler = FrameSampler::new(Arc::clone(&self.media), 1.0, max_w, max_h);
        let frames = sampler
            .sample(&source, source.duration / 2.0, 1.0)
            .await
            .map_err(|e| ScanError::unreadable(path, e))?;

        frames.into_iter().next().ok_or_else(|| {
            ScanError::unreadable(
                path,
                MediaError::Failed {
                    tool: "ffmpeg",
                    message: "no frame at midpoint".to_string(),
                },
            )
        })
    }

    async fn metrics_for(&self, path: &Path) -> Result<ImageMetrics> {
        let frame = self.representative_frame(path).await?;
        Ok(ImageMetrics::analyze(&frame))
    }

    /// Rank the clips under `clip_dir` against the taste set in `taste_dir`
    /// and pick `n` of them with diversity
    pub async fn recommend(&self, clip_dir: &Path, taste_dir: Option<&Path>, n: usize) -> Result<Vec<Recommendation>> {
        let extensions = clip_extensions(&self.config.paths.supported_extensions);
        let params = DiversifyParams::from(&self.config.diversify);

        let mut references = Vec::new();
        if let Some(dir) = taste_dir {
            for path in discover_sources(dir, &extensions) {
                match self.metrics_for(&path).await {
                    Ok(metrics) => references.push(metrics.quad_features),
                    Err(e) => warn!("Skipping taste reference {}: {}", path.display(), e),
                }
            }
        }
        let taste = TasteProfile::new(references);
        if taste.is_empty() {
            info!("🎨 No taste references, similarity fixed at 0.5");
        } else {
            info!("🎨 Taste profile from {} references", taste.len());
        }

        let mut paths = Vec::new();
        let mut clips = Vec::new();
        for path in discover_sources(clip_dir, &extensions) {
            match self.metrics_for(&path).await {
                Ok(metrics) => {
                    clips.push(score_clip(video_id_for(&path), &metrics, &taste, &params));
                    paths.push(path);
                }
                Err(e) => warn!("Skipping clip {}: {}", path.display(), e),
            }
        }
        info!("📊 Scored {} clips", clips.len());

        let picks: Vec<DiversifiedPick> = diversified_select(&clips, n, &params);
        Ok(picks
            .into_iter()
            .enumerate()
            .map(|(rank, pick)| Recommendation {
                rank: rank + 1,
                path: paths[pick.index].clone(),
                id: pick.id,
                score: pick.score,
                effective_score: pick.effective_score,
                interest: pick.interest,
                similarity: pick.similarity,
            })
            .collect())
    }

    /// Map of source identifier to path under the configured source root.
    /// The first path in sorted order wins, matching `scan_archive`.
    fn source_index(&self) -> HashMap<String, PathBuf> {
        let (sources, _) = unique_sources(discover_sources(
            &self.config.paths.source_root,
            &self.config.paths.supported_extensions,
        ));
        sources.into_iter().map(|path| (video_id_for(&path), path)).collect()
    }

    fn resolve_source(&self, record: &SelectionRecord, index: &HashMap<String, PathBuf>) -> Option<PathBuf> {
        record
            .source_path
            .clone()
            .filter(|p| p.exists())
            .or_else(|| index.get(&record.video_id).cloned())
    }

    /// Transcode each selection record into `output_dir`. Existing outputs are
    /// left alone; a failed transcode is reported and does not stop the rest.
    pub async fn export(&self, records: &[SelectionRecord], output_dir: &Path) -> Result<ExportSummary> {
        tokio::fs::create_dir_all(output_dir).await?;
        let index = self.source_index();
        let params = ExportParams::from(&self.config.export);
        let mut summary = ExportSummary::default();

        let mut jobs = Vec::new();
        for record in records {
            let output = output_dir.join(&record.output_file);
            if output.exists() {
                debug!("⏭️ Already exported: {}", record.output_file);
                summary.already_present += 1;
                continue;
            }
            match self.resolve_source(record, &index) {
                Some(source) => jobs.push((record, source, output)),
                None => {
                    warn!("Source not found for {}", record.video_id);
                    summary.failed.push(record.output_file.clone());
                }
            }
        }

        info!("🎬 Exporting {} clips to {}", jobs.len(), output_dir.display());
        let results: Vec<_> = stream::iter(jobs)
            .map(|(record, source, output)| {
                let params = &params;
                async move {
                    let result = self
                        .media
                        .transcode(&source, record.loop_start, record.loop_duration, params, &output)
                        .await;
                    (record, result)
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        for (record, result) in results {
            match result {
                Ok(path) => summary.exported.push(path),
                Err(e) => {
                    warn!("❌ Export failed for {}: {}", record.output_file, e);
                    summary.failed.push(record.output_file.clone());
                }
            }
        }
        summary.exported.sort();

        info!(
            "🎉 Exported {} clips ({} already present, {} failed)",
            summary.exported.len(),
            summary.already_present,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Re-search each record within `margin` seconds of its bounds and keep
    /// the best-scoring loop found there. Records whose source cannot be read
    /// are kept unchanged.
    pub async fn refine(&self, records: &[SelectionRecord], margin: f64) -> Result<Vec<Candidate>> {
        let index = self.source_index();
        let sampler = FrameSampler::from_config(Arc::clone(&self.media), &self.config.sampling);
        let params = LoopSearchParams::from_config(&self.config.loop_search, sampler.fps(), None);
        let mut refined = Vec::with_capacity(records.len());

        for record in records {
            let original = Candidate::new(&record.video_id, record.loop_start, record.loop_end, record.loop_score)
                .with_interest(record.visual_interest);

            let Some(path) = self.resolve_source(record, &index) else {
                warn!("Source not found for {}, keeping original", record.video_id);
                refined.push(original);
                continue;
            };

            let window_start = (record.loop_start - margin).max(0.0);
            let window_len = record.loop_end + margin - window_start;
            let frames = match self.probe(&path).await {
                Ok(source) => sampler.sample(&source, window_start, window_len).await.unwrap_or_else(|e| {
                    warn!("Decode failed for {}: {}", record.video_id, e);
                    Vec::new()
                }),
                Err(e) => {
                    warn!("{}", e);
                    Vec::new()
                }
            };

            match best_loop_in_window(&frames, self.loop_extractor.as_ref(), &params) {
                Some(hit) if (hit.score as f64) < record.loop_score => {
                    let start = window_start + hit.start as f64 / params.fps;
                    let end = start + hit.span() as f64 / params.fps;
                    debug!(
                        "🔧 {}: {:.1}s-{:.1}s -> {:.1}s-{:.1}s (score {:.4} -> {:.4})",
                        record.video_id, record.loop_start, record.loop_end, start, end, record.loop_score, hit.score
                    );
                    refined.push(
                        Candidate::new(&record.video_id, start, end, hit.score as f64)
                            .with_interest(hit.visual_interest as f64)
                            .with_source(path),
                    );
                }
                _ => refined.push(original.with_source(path)),
            }
        }

        Ok(refined)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn clip_extensions(video_extensions: &[String]) -> Vec<String> {
    video_extensions
        .iter()
        .cloned()
        .chain(IMAGE_EXTENSIONS.iter().map(|e| e.to_string()))
        .collect()
}
