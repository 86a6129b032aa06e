// src/publish.rs
//! Publication gate: flips every pending article in one store operation, then applies
//! per-category retention and prunes consumed staging rows.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::error::{PipelineError, Result};
use crate::rank;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub published: usize,
    pub evicted: usize,
    pub staging_pruned: usize,
}

/// Publish the pending set as one batch. An empty pending set is a no-op. A failed flip
/// is surfaced as `PipelineError::Publication` and nothing after it runs; the whole set
/// is retried on the next window.
pub async fn run_publish(
    store: &dyn Store,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<PublishReport> {
    let published = store.publish_pending(now).await.map_err(|e| match e {
        PipelineError::Publication(_) => e,
        other => PipelineError::Publication(other.to_string()),
    })?;
    counter!("publish_rows_total").increment(published as u64);

    let mut report = PublishReport {
        published,
        ..PublishReport::default()
    };
    if published == 0 {
        info!(target: "publish", "nothing pending, publish is a no-op");
        return Ok(report);
    }

    // retention failures leave the batch published; log and move on
    match apply_retention(store, retention, now).await {
        Ok(n) => report.evicted = n,
        Err(e) => warn!(target: "publish", error = %e, "retention pass failed"),
    }
    match store
        .prune_staging(now - Duration::hours(retention.staging_age_hours))
        .await
    {
        Ok(n) => report.staging_pruned = n,
        Err(e) => warn!(target: "publish", error = %e, "staging prune failed"),
    }

    info!(
        target: "publish",
        published = report.published,
        evicted = report.evicted,
        staging_pruned = report.staging_pruned,
        "release done"
    );
    Ok(report)
}

async fn apply_retention(store: &dyn Store, cfg: &RetentionConfig, now: DateTime<Utc>) -> Result<usize> {
    let published = store.published(None).await?;
    let doomed = rank::select_for_retention(
        &published,
        cfg.max_items_per_category,
        Duration::hours(cfg.max_age_hours),
        now,
    );
    if doomed.is_empty() {
        return Ok(0);
    }
    let n = store.delete_entries(&doomed).await?;
    counter!("publish_evicted_total").increment(n as u64);
    Ok(n)
}
