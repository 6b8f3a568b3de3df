//! Candidate selection and de-duplication.
//!
//! Within a source, candidates are accepted best-first unless their start
//! lies within `min_separation` seconds of an accepted one. Start proximity
//! stands in for overlap since clip durations are close to constant. Across
//! sources, a weighted rank of normalised score and interest picks the global
//! top N with a per-source cap.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::candidate::{Candidate, SelectionRecord};
use crate::config::SelectionConfig;
use crate::error::Result;

/// Ranked, de-duplicated output of a selection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSet {
    pub candidates: Vec<Candidate>,
}

impl SelectionSet {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn records(&self, container: &str) -> Vec<SelectionRecord> {
        self.candidates
            .iter()
            .map(|c| SelectionRecord::from_candidate(c, container))
            .collect()
    }

    /// Write the results file (JSON array of selection records)
    pub async fn save(&self, path: &Path, container: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.records(container))?;
        tokio::fs::write(path, json).await?;
        info!("💾 Saved {} selections to: {}", self.len(), path.display());
        Ok(())
    }
}

/// Load a previously written results file
pub async fn load_records(path: &Path) -> Result<Vec<SelectionRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

fn by_score_then_interest(a: &Candidate, b: &Candidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| b.visual_interest.total_cmp(&a.visual_interest))
}

/// Group candidates by source, keeping first-seen source order
fn group_by_source(candidates: &[Candidate]) -> Vec<Vec<Candidate>> {
    let mut order: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<Candidate>> = Vec::new();
    for c in candidates {
        let idx = *order.entry(c.video_id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[idx].push(c.clone());
    }
    groups
}

/// Drop candidates scoring above `score_threshold`
pub fn filter_by_score(candidates: Vec<Candidate>, score_threshold: f64) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| c.score <= score_threshold)
        .collect()
}

/// Per-source greedy de-duplication by start-time proximity. The result is
/// ordered by score, best first.
pub fn dedupe_per_source(candidates: &[Candidate], min_separation: f64) -> SelectionSet {
    let mut selected = Vec::new();

    for mut group in group_by_source(candidates) {
        group.sort_by(by_score_then_interest);
        let mut picked: Vec<Candidate> = Vec::new();
        for c in group {
            let overlaps = picked
                .iter()
                .any(|p| (c.start_time - p.start_time).abs() < min_separation);
            if !overlaps {
                picked.push(c);
            }
        }
        selected.extend(picked);
    }

    selected.sort_by(|a, b| a.score.total_cmp(&b.score));
    SelectionSet {
        candidates: selected,
    }
}

/// Drop candidates starting within `min_separation` of an already exported
/// segment from the same source
pub fn exclude_existing(
    candidates: Vec<Candidate>,
    existing: &[SelectionRecord],
    min_separation: f64,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            !existing.iter().any(|e| {
                e.video_id == c.video_id && (c.start_time - e.loop_start).abs() < min_separation
            })
        })
        .collect()
}

/// De-duplicate per source, then drop survivors within `min_separation` of an
/// exported segment. Candidates removed by the dedupe stay removed even when
/// the candidate that shadowed them is excluded afterwards.
pub fn select_new(candidates: &[Candidate], existing: &[SelectionRecord], min_separation: f64) -> SelectionSet {
    let deduped = dedupe_per_source(candidates, min_separation);
    SelectionSet {
        candidates: exclude_existing(deduped.candidates, existing, min_separation),
    }
}

/// Weighted ranking policy for the global selection; lower rank is better
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankPolicy {
    pub max_score: f64,
    pub min_interest: f64,
    pub interest_ceiling: f64,
    pub score_weight: f64,
    pub interest_weight: f64,
    pub max_per_source: usize,
    pub target_count: usize,
}

impl From<&SelectionConfig> for RankPolicy {
    fn from(config: &SelectionConfig) -> Self {
        Self {
            max_score: config.max_score,
            min_interest: config.min_interest,
            interest_ceiling: config.interest_ceiling,
            score_weight: config.score_weight,
            interest_weight: config.interest_weight,
            max_per_source: config.max_per_source,
            target_count: config.target_count,
        }
    }
}

impl RankPolicy {
    pub fn admits(&self, c: &Candidate) -> bool {
        c.score < self.max_score && c.visual_interest > self.min_interest
    }

    pub fn rank(&self, c: &Candidate) -> f64 {
        let norm_score = (c.score / self.max_score).clamp(0.0, 1.0);
        let interest_span = self.interest_ceiling - self.min_interest;
        let norm_interest = (1.0 - (c.visual_interest - self.min_interest) / interest_span).clamp(0.0, 1.0);
        norm_score * self.score_weight + norm_interest * self.interest_weight
    }
}

/// Global top-N across sources with at most `max_per_source` picks per source
pub fn select_top(candidates: &[Candidate], policy: &RankPolicy) -> SelectionSet {
    let mut ranked: Vec<(f64, &Candidate)> = candidates
        .iter()
        .filter(|c| policy.admits(c))
        .map(|c| (policy.rank(c), c))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut per_source: HashMap<&str, usize> = HashMap::new();
    let mut selected = Vec::new();
    for (_, c) in ranked {
        if selected.len() >= policy.target_count {
            break;
        }
        let count = per_source.entry(c.video_id.as_str()).or_insert(0);
        if *count >= policy.max_per_source {
            continue;
        }
        *count += 1;
        selected.push(c.clone());
    }

    SelectionSet {
        candidates: selected,
    }
}
