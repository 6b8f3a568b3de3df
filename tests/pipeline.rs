use async_trait::async_trait;
use loopscan::media::video_id_for;
use loopscan::{
    Candidate, CandidateCache, Config, ConfigBuilder, DecodeOutcome, ExportParams, MediaError, MediaService,
    MediaSource, Scanner, SelectionRecord, SelectionSet,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;

type Pattern = fn(f64) -> u8;

/// Brightness repeats every 8 seconds at 3 fps
fn sawtooth(t: f64) -> u8 {
    let k = (t * 3.0).round() as u64 % 24;
    30 + k as u8 * 8
}

fn scene_change_at_40(t: f64) -> u8 {
    if t < 40.0 {
        40
    } else {
        200
    }
}

#[derive(Clone)]
struct FakeSource {
    duration: f64,
    decodable_until: f64,
    pattern: Pattern,
    probe_fails: bool,
    decode_fails: bool,
}

impl FakeSource {
    fn new(duration: f64, pattern: Pattern) -> Self {
        Self {
            duration,
            decodable_until: duration,
            pattern,
            probe_fails: false,
            decode_fails: false,
        }
    }
}

/// Scripted media service producing uniform frames from a brightness pattern
#[derive(Default)]
struct FakeMedia {
    sources: HashMap<String, FakeSource>,
    decode_calls: AtomicUsize,
    max_frames_per_call: AtomicUsize,
    transcodes: Mutex<Vec<(String, f64, f64)>>,
}

impl FakeMedia {
    fn with_source(mut self, video_id: &str, source: FakeSource) -> Self {
        self.sources.insert(video_id.to_string(), source);
        self
    }

    fn source(&self, path: &Path) -> Result<&FakeSource, MediaError> {
        self.sources.get(&video_id_for(path)).ok_or_else(|| MediaError::Failed {
            tool: "ffprobe",
            message: "No such file".to_string(),
        })
    }
}

#[async_trait]
impl MediaService for FakeMedia {
    async fn probe(&self, path: &Path) -> Result<MediaSource, MediaError> {
        let source = self.source(path)?;
        if source.probe_fails {
            return Err(MediaError::Failed {
                tool: "ffprobe",
                message: "moov atom not found".to_string(),
            });
        }
        Ok(MediaSource::new(path.to_path_buf(), source.duration, 1920, 1080))
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
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        let source = self.source(path)?;
        if source.decode_fails {
            return Err(MediaError::Timeout {
                tool: "ffmpeg",
                after: Duration::from_secs(300),
            });
        }

        let frame_size = width as usize * height as usize * 3;
        let first = (start * fps).round() as u64;
        let wanted = (duration * fps + 1e-9).floor() as u64;
        let mut raw = Vec::new();
        let mut count = 0;
        for k in first..first + wanted {
            let t = k as f64 / fps;
            if t >= source.decodable_until {
                break;
            }
            raw.extend(std::iter::repeat((source.pattern)(t)).take(frame_size));
            count += 1;
        }
        self.max_frames_per_call.fetch_max(count, Ordering::SeqCst);

        if raw.is_empty() {
            Ok(DecodeOutcome::Empty)
        } else {
            Ok(DecodeOutcome::Frames(raw))
        }
    }

    async fn transcode(
        &self,
        path: &Path,
        start: f64,
        duration: f64,
        _params: &ExportParams,
        output: &Path,
    ) -> Result<PathBuf, MediaError> {
        self.transcodes
            .lock()
            .unwrap()
            .push((video_id_for(path), start, duration));
        fs::write(output, b"clip").await?;
        Ok(output.to_path_buf())
    }
}

fn test_config(temp_dir: &TempDir) -> Config {
    ConfigBuilder::new()
        .with_source_root(temp_dir.path().join("recordings"))
        .with_cache_dir(temp_dir.path().join("cache"))
        .with_output_dir(temp_dir.path().join("output"))
        .with_sampling(3.0, 16, 9)
        .with_workers(2)
        .build()
}

async fn create_recordings(temp_dir: &TempDir, names: &[&str]) -> PathBuf {
    let root = temp_dir.path().join("recordings");
    fs::create_dir_all(&root).await.unwrap();
    for name in names {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.unwrap();
        }
        fs::write(path, b"mock recording").await.unwrap();
    }
    root
}

#[tokio::test]
async fn test_chunked_scan_finds_periodic_loops() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_recordings(&temp_dir, &["desk cam.mov"]).await;
    let media = Arc::new(FakeMedia::default().with_source("desk_cam", FakeSource::new(70.0, sawtooth)));

    let scanner = Scanner::new(test_config(&temp_dir), media.clone()).unwrap();
    let mut cache = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
    let summary = scanner.scan_archive(&root, &mut cache, false).await.unwrap();

    assert_eq!(summary.scanned, 1);
    assert!(summary.unreadable.is_empty());

    // One candidate per start point every 5s, each start scanned exactly once
    let starts: Vec<f64> = cache.candidates().iter().map(|c| c.start_time).collect();
    let expected: Vec<f64> = (0..13).map(|i| i as f64 * 5.0).collect();
    assert_eq!(starts.len(), expected.len());
    for (got, want) in starts.iter().zip(&expected) {
        assert!((got - want).abs() < 1e-9, "start {} != {}", got, want);
    }

    for c in cache.candidates() {
        assert_eq!(c.video_id, "desk_cam");
        assert_eq!(c.score, 0.0);
        assert!((c.duration - 8.0).abs() < 1e-9);
        assert!(c.duration >= 6.0 && c.duration <= 14.0);
        assert!(c.source_path.is_some());
    }

    // Never more than one chunk of frames (stride + overlap) in memory
    assert!(media.max_frames_per_call.load(Ordering::SeqCst) <= 138);
    assert_eq!(summary.stats.chunks_scanned, 3);
}

#[tokio::test]
async fn test_resumed_scan_skips_cached_sources() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_recordings(&temp_dir, &["a.mov", "b.mov"]).await;
    let media = Arc::new(
        FakeMedia::default()
            .with_source("a", FakeSource::new(40.0, sawtooth))
            .with_source("b", FakeSource::new(40.0, sawtooth)),
    );
    let scanner = Scanner::new(test_config(&temp_dir), media.clone()).unwrap();

    let mut cache = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
    let first = scanner.scan_archive(&root, &mut cache, false).await.unwrap();
    assert_eq!(first.scanned, 2);
    let decodes_after_first = media.decode_calls.load(Ordering::SeqCst);
    let candidates_after_first = cache.candidates().len();

    // A new process reopens the cache from disk
    let mut reopened = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
    let second = scanner.scan_archive(&root, &mut reopened, false).await.unwrap();

    assert_eq!(second.scanned, 0);
    assert_eq!(second.skipped_cached, 2);
    assert_eq!(media.decode_calls.load(Ordering::SeqCst), decodes_after_first);
    assert_eq!(reopened.candidates().len(), candidates_after_first);

    let forced = scanner.scan_archive(&root, &mut reopened, true).await.unwrap();
    assert_eq!(forced.scanned, 2);
    assert_eq!(reopened.candidates().len(), candidates_after_first);
}

#[tokio::test]
async fn test_recordings_sharing_a_stem_scan_once() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_recordings(&temp_dir, &["day1/rec.mov", "day2/rec.mov"]).await;
    let media = Arc::new(FakeMedia::default().with_source("rec", FakeSource::new(40.0, sawtooth)));
    let scanner = Scanner::new(test_config(&temp_dir), media.clone()).unwrap();

    let mut cache = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
    let first = scanner.scan_archive(&root, &mut cache, false).await.unwrap();
    assert_eq!(first.total_sources, 2);
    assert_eq!(first.scanned, 1);
    assert_eq!(first.duplicates, vec![root.join("day2").join("rec.mov")]);

    let entry = cache.entry("rec").unwrap();
    assert_eq!(entry.source_path.as_deref(), Some(root.join("day1").join("rec.mov").as_path()));
    assert!(cache
        .candidates()
        .iter()
        .all(|c| c.source_path.as_deref() == Some(root.join("day1").join("rec.mov").as_path())));
    let decodes_after_first = media.decode_calls.load(Ordering::SeqCst);
    let candidates_after_first = cache.candidates().len();

    // The shadowed recording must not make the source look changed
    let mut reopened = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
    let second = scanner.scan_archive(&root, &mut reopened, false).await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.skipped_cached, 1);
    assert_eq!(second.duplicates.len(), 1);
    assert_eq!(media.decode_calls.load(Ordering::SeqCst), decodes_after_first);
    assert_eq!(reopened.candidates().len(), candidates_after_first);
}

#[tokio::test]
async fn test_unreadable_source_does_not_abort_scan() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_recordings(&temp_dir, &["broken.mov", "good.mov", "stalls.mov"]).await;

    let mut broken = FakeSource::new(60.0, sawtooth);
    broken.probe_fails = true;
    let mut stalls = FakeSource::new(60.0, sawtooth);
    stalls.decode_fails = true;

    let media = Arc::new(
        FakeMedia::default()
            .with_source("broken", broken)
            .with_source("good", FakeSource::new(40.0, sawtooth))
            .with_source("stalls", stalls),
    );
    let scanner = Scanner::new(test_config(&temp_dir), media).unwrap();
    let mut cache = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
    let summary = scanner.scan_archive(&root, &mut cache, false).await.unwrap();

    assert_eq!(summary.total_sources, 3);
    assert_eq!(summary.scanned, 1);
    let mut unreadable: Vec<String> = summary.unreadable.iter().map(|p| video_id_for(p)).collect();
    unreadable.sort();
    assert_eq!(unreadable, vec!["broken", "stalls"]);

    // Failed sources stay eligible for the next run
    assert!(cache.is_scanned("good"));
    assert!(!cache.is_scanned("broken"));
    assert!(!cache.is_scanned("stalls"));
}

#[tokio::test]
async fn test_empty_decode_ends_source_cleanly() {
    let temp_dir = TempDir::new().unwrap();
    create_recordings(&temp_dir, &["truncated.mov"]).await;

    // Container claims 70s but frames stop at 35s
    let mut truncated = FakeSource::new(70.0, sawtooth);
    truncated.decodable_until = 35.0;
    let media = Arc::new(FakeMedia::default().with_source("truncated", truncated));

    let scanner = Scanner::new(test_config(&temp_dir), media).unwrap();
    let outcome = scanner
        .scan_source(&temp_dir.path().join("recordings").join("truncated.mov"))
        .await
        .unwrap();

    assert_eq!(outcome.stats.empty_chunks, 1);
    assert_eq!(outcome.stats.short_chunks, 1);
    assert_eq!(outcome.candidates.len(), 6);
    assert!(outcome.candidates.iter().all(|c| c.end_time <= 35.0));
}

#[tokio::test]
async fn test_cut_scan_reports_scene_change() {
    let temp_dir = TempDir::new().unwrap();
    let root = create_recordings(&temp_dir, &["talk.mov"]).await;
    let media = Arc::new(FakeMedia::default().with_source("talk", FakeSource::new(90.0, scene_change_at_40)));

    let scanner = Scanner::new(test_config(&temp_dir), media).unwrap();
    let reports = scanner.scan_cuts_archive(&root).await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.cuts.len(), 1);
    assert!((report.cuts[0] - 42.0).abs() < 1e-6);
    assert_eq!(report.segments.len(), 2);
    assert_eq!(report.segments[0].start, 0.0);
    assert_eq!(report.segments[1].end, 90.0);

    // Uniform frames differ only in brightness, which cosine similarity ignores
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].members, vec![0, 1]);
    assert_eq!(report.groups[0].representative, 1);
}

#[tokio::test]
async fn test_export_transcodes_each_record_once() {
    let temp_dir = TempDir::new().unwrap();
    create_recordings(&temp_dir, &["desk cam.mov"]).await;
    let media = Arc::new(FakeMedia::default().with_source("desk_cam", FakeSource::new(120.0, sawtooth)));
    let scanner = Scanner::new(test_config(&temp_dir), media.clone()).unwrap();

    let set = SelectionSet {
        candidates: vec![
            Candidate::new("desk_cam", 15.0, 23.0, 0.0),
            Candidate::new("desk_cam", 45.0, 53.0, 0.0),
            Candidate::new("missing", 0.0, 8.0, 0.0),
        ],
    };
    let records: Vec<SelectionRecord> = set.records("mp4");

    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(&output_dir).await.unwrap();
    fs::write(output_dir.join("desk_cam_t0045_loop.mp4"), b"old").await.unwrap();

    let summary = scanner.export(&records, &output_dir).await.unwrap();
    assert_eq!(summary.exported, vec![output_dir.join("desk_cam_t0015_loop.mp4")]);
    assert_eq!(summary.already_present, 1);
    assert_eq!(summary.failed, vec!["missing_t0000_loop.mp4".to_string()]);

    let calls = media.transcodes.lock().unwrap().clone();
    assert_eq!(calls, vec![("desk_cam".to_string(), 15.0, 8.0)]);
}

#[tokio::test]
async fn test_refine_tightens_loop_around_record() {
    let temp_dir = TempDir::new().unwrap();
    create_recordings(&temp_dir, &["desk cam.mov"]).await;
    let media = Arc::new(FakeMedia::default().with_source("desk_cam", FakeSource::new(120.0, sawtooth)));
    let scanner = Scanner::new(test_config(&temp_dir), media).unwrap();

    let records = vec![SelectionRecord::from_candidate(
        &Candidate::new("desk_cam", 10.0, 17.0, 0.05),
        "mp4",
    )];
    let refined = scanner.refine(&records, 2.0).await.unwrap();

    assert_eq!(refined.len(), 1);
    assert_eq!(refined[0].score, 0.0);
    assert!((refined[0].duration - 8.0).abs() < 1e-9);
    assert!(refined[0].start_time >= 8.0 && refined[0].end_time <= 19.0);
}

fn noise_poster(seed: u64, red_tint: bool) -> image::RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    image::RgbImage::from_fn(64, 36, |_, _| {
        if red_tint {
            image::Rgb([rng.gen_range(128..=255), rng.gen_range(0..128), rng.gen_range(0..128)])
        } else {
            image::Rgb([rng.gen(), rng.gen(), rng.gen()])
        }
    })
}

#[tokio::test]
async fn test_recommend_prefers_distinct_clip_over_duplicate() {
    let temp_dir = TempDir::new().unwrap();
    let clip_dir = temp_dir.path().join("posters");
    fs::create_dir_all(&clip_dir).await.unwrap();

    let poster = noise_poster(1, false);
    poster.save(clip_dir.join("a1.png")).unwrap();
    poster.save(clip_dir.join("a2.png")).unwrap();
    noise_poster(2, true).save(clip_dir.join("b.png")).unwrap();

    let scanner = Scanner::new(test_config(&temp_dir), Arc::new(FakeMedia::default())).unwrap();
    let first = scanner.recommend(&clip_dir, None, 2).await.unwrap();
    let second = scanner.recommend(&clip_dir, None, 2).await.unwrap();

    let ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "b"]);
    assert_eq!(first[0].rank, 1);
    assert!(first.iter().all(|r| r.similarity == 0.5));

    let again: Vec<&str> = second.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, again);
}

#[tokio::test]
async fn test_recommend_uses_video_midpoint_frame() {
    let temp_dir = TempDir::new().unwrap();
    let clip_dir = temp_dir.path().join("clips");
    fs::create_dir_all(&clip_dir).await.unwrap();
    fs::write(clip_dir.join("clip.mp4"), b"mock clip").await.unwrap();

    let media = Arc::new(FakeMedia::default().with_source("clip", FakeSource::new(10.0, sawtooth)));
    let scanner = Scanner::new(test_config(&temp_dir), media.clone()).unwrap();
    let picks = scanner.recommend(&clip_dir, None, 5).await.unwrap();

    assert_eq!(picks.len(), 1);
    assert_eq!(picks[0].id, "clip");
    assert_eq!(media.decode_calls.load(Ordering::SeqCst), 1);
}
