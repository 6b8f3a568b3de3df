/// Resumable per-source candidate cache
///
/// Two files live in the cache directory: `candidates_cache.json`, a JSON
/// array of every candidate found so far, and `scanned_sources.json`, the
/// manifest of completed sources. Both are rewritten atomically after each
/// source so an interrupted scan loses at most the source in flight.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, ScanStats};
use crate::error::{Result, ScanError};
use crate::media::MediaSource;

pub const CANDIDATES_FILE: &str = "candidates_cache.json";
pub const MANIFEST_FILE: &str = "scanned_sources.json";

/// Manifest entry for a completed source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedSource {
    pub video_id: String,
    pub source_path: Option<PathBuf>,
    /// md5 of path, size and modification time; empty for legacy entries
    pub fingerprint: String,
    pub duration: f64,
    pub candidate_count: usize,
    pub scanned_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: ScanStats,
}

/// Cache statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub sources: usize,
    pub candidates: usize,
    pub sources_without_candidates: usize,
    pub missing_sources: usize,
}

/// Append-only candidate store keyed by source identifier
#[derive(Debug)]
pub struct CandidateCache {
    dir: PathBuf,
    candidates: Vec<Candidate>,
    scanned: BTreeMap<String, ScannedSource>,
}

impl CandidateCache {
    /// Open (or create) the cache in `dir`, loading any previous run
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let candidates: Vec<Candidate> = read_json(&dir.join(CANDIDATES_FILE)).await?.unwrap_or_default();
        let mut scanned: BTreeMap<String, ScannedSource> = read_json::<Vec<ScannedSource>>(&dir.join(MANIFEST_FILE))
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|s| (s.video_id.clone(), s))
            .collect();

        // A candidates file without a manifest still marks its sources as done
        for c in &candidates {
            if !scanned.contains_key(&c.video_id) {
                scanned.insert(
                    c.video_id.clone(),
                    ScannedSource {
                        video_id: c.video_id.clone(),
                        source_path: c.source_path.clone(),
                        fingerprint: String::new(),
                        duration: 0.0,
                        candidate_count: 0,
                        scanned_at: Utc::now(),
                        stats: ScanStats::default(),
                    },
                );
            }
        }
        for entry in scanned.values_mut().filter(|s| s.fingerprint.is_empty()) {
            entry.candidate_count = candidates.iter().filter(|c| c.video_id == entry.video_id).count();
        }

        info!(
            "📊 Candidate cache opened: {} candidates from {} sources",
            candidates.len(),
            scanned.len()
        );

        Ok(Self {
            dir,
            candidates,
            scanned,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn is_scanned(&self, video_id: &str) -> bool {
        self.scanned.contains_key(video_id)
    }

    pub fn entry(&self, video_id: &str) -> Option<&ScannedSource> {
        self.scanned.get(video_id)
    }

    /// Whether the cached entry still matches the file on disk.
    /// Legacy entries without a fingerprint are trusted.
    pub async fn is_current(&self, video_id: &str, path: &Path) -> bool {
        match self.scanned.get(video_id) {
            None => false,
            Some(entry) if entry.fingerprint.is_empty() => true,
            Some(entry) => match fingerprint(path).await {
                Ok(current) => current == entry.fingerprint,
                Err(e) => {
                    debug!("Cannot fingerprint {}: {}", path.display(), e);
                    false
                }
            },
        }
    }

    /// Replace a source's candidates, mark it completed and flush to disk
    pub async fn record_source(
        &mut self,
        source: &MediaSource,
        candidates: Vec<Candidate>,
        stats: ScanStats,
    ) -> Result<()> {
        let fingerprint = fingerprint(&source.path).await.unwrap_or_else(|e| {
            warn!("Cannot fingerprint {}: {}", source.path.display(), e);
            String::new()
        });

        self.candidates.retain(|c| c.video_id != source.video_id);
        let candidate_count = candidates.len();
        self.candidates.extend(candidates);
        self.scanned.insert(
            source.video_id.clone(),
            ScannedSource {
                video_id: source.video_id.clone(),
                source_path: Some(source.path.clone()),
                fingerprint,
                duration: source.duration,
                candidate_count,
                scanned_at: Utc::now(),
                stats,
            },
        );

        self.flush().await?;
        debug!("💾 Cached {} candidates for {}", candidate_count, source.video_id);
        Ok(())
    }

    /// Forget a source so the next run rescans it
    pub async fn invalidate(&mut self, video_id: &str) -> Result<bool> {
        let existed = self.scanned.remove(video_id).is_some();
        self.candidates.retain(|c| c.video_id != video_id);
        if existed {
            self.flush().await?;
            info!("🗑️ Invalidated cache for: {}", video_id);
        }
        Ok(existed)
    }

    /// Drop every cached source
    pub async fn clear(&mut self) -> Result<usize> {
        let cleared = self.scanned.len();
        self.scanned.clear();
        self.candidates.clear();
        self.flush().await?;
        info!("🧹 Cleared {} cached sources", cleared);
        Ok(cleared)
    }

    /// Remove entries whose source file no longer exists
    pub async fn prune_missing(&mut self) -> Result<usize> {
        let missing: Vec<String> = self
            .scanned
            .values()
            .filter(|s| s.source_path.as_ref().map_or(false, |p| !p.exists()))
            .map(|s| s.video_id.clone())
            .collect();

        for id in &missing {
            self.scanned.remove(id);
            self.candidates.retain(|c| &c.video_id != id);
        }
        if !missing.is_empty() {
            self.flush().await?;
            info!("🧹 Pruned {} sources that no longer exist", missing.len());
        }
        Ok(missing.len())
    }

    pub fn list(&self) -> Vec<&ScannedSource> {
        let mut entries: Vec<&ScannedSource> = self.scanned.values().collect();
        entries.sort_by(|a, b| b.scanned_at.cmp(&a.scanned_at));
        entries
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            sources: self.scanned.len(),
            candidates: self.candidates.len(),
            sources_without_candidates: self.scanned.values().filter(|s| s.candidate_count == 0).count(),
            missing_sources: self
                .scanned
                .values()
                .filter(|s| s.source_path.as_ref().map_or(false, |p| !p.exists()))
                .count(),
        }
    }

    async fn flush(&self) -> Result<()> {
        let candidates = serde_json::to_vec_pretty(&self.candidates)?;
        let manifest = serde_json::to_vec_pretty(&self.scanned.values().collect::<Vec<_>>())?;
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            write_atomic(&dir, CANDIDATES_FILE, &candidates)?;
            write_atomic(&dir, MANIFEST_FILE, &manifest)
        })
        .await
        .map_err(|e| ScanError::Cache(format!("cache writer panicked: {}", e)))?
    }
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name))
        .map_err(|e| ScanError::Cache(format!("cannot replace {}: {}", name, e)))?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ScanError::Cache(format!("cannot parse {}: {}", path.display(), e)))
}

/// md5 over path, size and modification time
pub async fn fingerprint(path: &Path) -> Result<String> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let key = format!("{}|{}|{}", path.display(), metadata.len(), modified);
    Ok(format!("{:x}", md5::compute(key.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(dir: &Path, name: &str) -> MediaSource {
        let path = dir.join(name);
        std::fs::write(&path, b"recording").unwrap();
        MediaSource::new(path, 120.0, 1920, 1080)
    }

    #[tokio::test]
    async fn test_record_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("cache");
        let src = source(temp_dir.path(), "rec one.mov");

        let mut cache = CandidateCache::open(&cache_dir).await.unwrap();
        cache
            .record_source(&src, vec![Candidate::new("rec_one", 3.0, 10.0, 0.02)], ScanStats::default())
            .await
            .unwrap();

        let reopened = CandidateCache::open(&cache_dir).await.unwrap();
        assert!(reopened.is_scanned("rec_one"));
        assert_eq!(reopened.candidates().len(), 1);
        assert!(reopened.is_current("rec_one", &src.path).await);
    }

    #[tokio::test]
    async fn test_source_without_candidates_is_still_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let src = source(temp_dir.path(), "quiet.mov");

        let mut cache = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
        cache.record_source(&src, Vec::new(), ScanStats::default()).await.unwrap();

        let reopened = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
        assert!(reopened.is_scanned("quiet"));
        assert_eq!(reopened.stats().sources_without_candidates, 1);
    }

    #[tokio::test]
    async fn test_legacy_candidates_file_marks_sources() {
        let temp_dir = TempDir::new().unwrap();
        let legacy = vec![Candidate::new("old_rec", 0.0, 8.0, 0.01)];
        std::fs::write(
            temp_dir.path().join(CANDIDATES_FILE),
            serde_json::to_string(&legacy).unwrap(),
        )
        .unwrap();

        let cache = CandidateCache::open(temp_dir.path()).await.unwrap();
        assert!(cache.is_scanned("old_rec"));
        assert_eq!(cache.entry("old_rec").unwrap().candidate_count, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_prune() {
        let temp_dir = TempDir::new().unwrap();
        let keep = source(temp_dir.path(), "keep.mov");
        let gone = source(temp_dir.path(), "gone.mov");

        let mut cache = CandidateCache::open(temp_dir.path().join("cache")).await.unwrap();
        cache.record_source(&keep, vec![Candidate::new("keep", 0.0, 7.0, 0.01)], ScanStats::default()).await.unwrap();
        cache.record_source(&gone, vec![Candidate::new("gone", 0.0, 7.0, 0.01)], ScanStats::default()).await.unwrap();

        std::fs::remove_file(&gone.path).unwrap();
        assert_eq!(cache.prune_missing().await.unwrap(), 1);
        assert!(!cache.is_scanned("gone"));

        assert!(cache.invalidate("keep").await.unwrap());
        assert!(!cache.invalidate("keep").await.unwrap());
        assert!(cache.candidates().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CANDIDATES_FILE), b"{not json").unwrap();
        assert!(matches!(
            CandidateCache::open(temp_dir.path()).await,
            Err(ScanError::Cache(_))
        ));
    }
}
