// src/rank.rs
//! Desirability score, dense per-category ranks and the read-side orderings.
//!
//! score = (w_e * engagement + w_r * recency) / 10, in [0, 10]
//!   engagement = 0.5 * excitement + 0.3 * shock + 0.2 * sadness
//!   recency    = 100 * 0.5^(age_hours / half_life)

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::RankingConfig;
use crate::error::Result;
use crate::model::{Category, EnrichedArticle, RankedEntry, Vibe};
use crate::store::Store;

pub fn engagement(vibe: &Vibe, cfg: &RankingConfig) -> f32 {
    let v = vibe.clamped();
    (cfg.excitement_weight * v.excitement + cfg.shock_weight * v.shock + cfg.sadness_weight * v.sadness)
        .clamp(0.0, 100.0)
}

/// Exponential decay from discovery to analysis time.
pub fn recency(discovered_at: DateTime<Utc>, analyzed_at: DateTime<Utc>, half_life_hours: f32) -> f32 {
    let age_h = (analyzed_at - discovered_at).num_seconds().max(0) as f32 / 3600.0;
    100.0 * 0.5_f32.powf(age_h / half_life_hours.max(f32::EPSILON))
}

/// Frozen at analysis time; also serves as the cross-category score.
pub fn desirability_score(article: &EnrichedArticle, cfg: &RankingConfig) -> f32 {
    let e = engagement(&article.vibe, cfg);
    let r = recency(article.discovered_at, article.analyzed_at, cfg.recency_half_life_hours);
    let score = (cfg.engagement_weight * e + cfg.recency_weight * r) / 10.0;
    if score.is_finite() {
        score.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

/// Score descending, then earlier discovery, then link. Total and deterministic.
pub fn rank_order(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.article.discovered_at.cmp(&b.article.discovered_at))
        .then_with(|| a.article.source_link.cmp(&b.article.source_link))
        .then_with(|| a.id.cmp(&b.id))
}

/// Dense 1..N ranks per category.
pub fn assign_category_ranks(entries: &[RankedEntry]) -> Vec<(Uuid, u32)> {
    let mut by_cat: BTreeMap<Category, Vec<&RankedEntry>> = BTreeMap::new();
    for e in entries {
        by_cat.entry(e.article.category).or_default().push(e);
    }
    let mut out = Vec::with_capacity(entries.len());
    for (_, mut group) in by_cat {
        group.sort_by(|a, b| rank_order(a, b));
        out.extend(group.iter().enumerate().map(|(i, e)| (e.id, i as u32 + 1)));
    }
    out
}

/// Recompute ranks over every unpublished entry, so the next epoch carries dense ranks.
pub async fn rerank_pending(store: &dyn Store) -> Result<usize> {
    let pending = store.pending_entries(None).await?;
    let ranks = assign_category_ranks(&pending);
    store.set_ranks(&ranks).await?;
    Ok(ranks.len())
}

/// "All" view: score descending, earlier discovery first, id last.
pub fn sort_all_view(entries: &mut [RankedEntry]) {
    entries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.article.discovered_at.cmp(&b.article.discovered_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Single-category view: newest epoch first, then rank; unranked rows trail their epoch.
pub fn sort_category_view(entries: &mut [RankedEntry]) {
    entries.sort_by(|a, b| {
        b.article
            .published_at
            .cmp(&a.article.published_at)
            .then_with(|| match (a.rank, b.rank) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| rank_order(a, b))
    });
}

/// Ids to delete so each category keeps at most `max_items` published entries.
/// Entries analyzed before `now - max_age` go first (oldest first), then lowest score.
pub fn select_for_retention(
    published: &[RankedEntry],
    max_items: usize,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<Uuid> {
    let threshold = now - max_age;
    let mut by_cat: BTreeMap<Category, Vec<&RankedEntry>> = BTreeMap::new();
    for e in published {
        by_cat.entry(e.article.category).or_default().push(e);
    }

    let mut doomed = Vec::new();
    for (_, mut group) in by_cat {
        let mut excess = group.len().saturating_sub(max_items);
        if excess == 0 {
            continue;
        }
        group.sort_by(|a, b| {
            a.article
                .analyzed_at
                .cmp(&b.article.analyzed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        let (stale, fresh): (Vec<&RankedEntry>, Vec<&RankedEntry>) = group
            .into_iter()
            .partition(|e| e.article.analyzed_at < threshold);

        for e in &stale {
            if excess == 0 {
                break;
            }
            doomed.push(e.id);
            excess -= 1;
        }

        let mut survivors: Vec<&RankedEntry> =
            stale.into_iter().filter(|e| !doomed.contains(&e.id)).chain(fresh).collect();
        survivors.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| rank_order(b, a)));
        for e in survivors.into_iter().take(excess) {
            doomed.push(e.id);
        }
    }
    doomed
}
