// src/analyze/on_demand.rs
//! Reader-triggered search: answer from the article table when possible, otherwise run
//! one fresh provider search over a long window and ingest a single synthetic item.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::info;

use super::{ExtractionWorker, IngestMode};
use crate::config::ProvidersConfig;
use crate::error::{with_timeout, Result};
use crate::ingest::types::{SearchProvider, SearchRequest};
use crate::ingest::SNIPPET_MAX_CHARS;
use crate::model::{Category, RankedEntry, RawCandidate};
use crate::store::Store;

pub const NO_RESULTS_MESSAGE: &str = "No related articles found.";

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Found {
        found: bool,
        data: RankedEntry,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        created_now: bool,
    },
    NotFound {
        found: bool,
        message: String,
    },
}

impl SearchOutcome {
    fn existing(data: RankedEntry) -> Self {
        SearchOutcome::Found {
            found: true,
            data,
            created_now: false,
        }
    }

    fn created(data: RankedEntry) -> Self {
        SearchOutcome::Found {
            found: true,
            data,
            created_now: true,
        }
    }

    fn not_found() -> Self {
        SearchOutcome::NotFound {
            found: false,
            message: NO_RESULTS_MESSAGE.to_string(),
        }
    }
}

/// Fold up to `count` results into one candidate: first link/title/source, first image,
/// and `title: snippet` lines as the body.
fn synthesize(keyword: &str, results: &[RawCandidate], now: DateTime<Utc>) -> Option<RawCandidate> {
    let first = results.first()?;
    let mut combined = results
        .iter()
        .map(|r| format!("{}: {}", r.title, r.snippet))
        .collect::<Vec<_>>()
        .join("\n");
    if let Some((cut, _)) = combined.char_indices().nth(SNIPPET_MAX_CHARS) {
        combined.truncate(cut);
    }
    Some(RawCandidate {
        link: first.link.clone(),
        title: format!("{}: {}", keyword, first.title),
        snippet: combined,
        source: first.source.clone(),
        image_url: results.iter().find_map(|r| r.image_url.clone()),
        discovered_at: now,
        category: first.category,
    })
}

pub async fn search_or_create(
    store: &dyn Store,
    provider: Option<&dyn SearchProvider>,
    worker: &ExtractionWorker,
    cfg: &ProvidersConfig,
    keyword: &str,
    now: DateTime<Utc>,
) -> Result<SearchOutcome> {
    let keyword = keyword.trim();
    if let Some(hit) = store.find_by_subject(keyword).await? {
        counter!("search_requests_total", "outcome" => "existing").increment(1);
        return Ok(SearchOutcome::existing(hit));
    }

    let Some(provider) = provider else {
        counter!("search_requests_total", "outcome" => "empty").increment(1);
        return Ok(SearchOutcome::not_found());
    };
    let req = SearchRequest {
        query: format!("{keyword} K-pop news"),
        category: Category::KPop,
        count: cfg.result_count,
        date_window: Some(cfg.on_demand_window.clone()),
        discovered_at: now,
    };
    let results = with_timeout(
        format!("{} search", provider.name()),
        Duration::from_secs(cfg.timeout_secs),
        provider.search(&req),
    )
    .await?;

    let Some(candidate) = synthesize(keyword, &results, now) else {
        counter!("search_requests_total", "outcome" => "empty").increment(1);
        return Ok(SearchOutcome::not_found());
    };

    let mode = IngestMode::OnDemand {
        subject: keyword.to_string(),
    };
    let article = worker.ingest_one(&candidate, &mode, now).await?;
    // single ad hoc row: no rank, neutral score
    let entry = RankedEntry::new(article, 0.0);
    store.insert_entries(std::slice::from_ref(&entry)).await?;

    counter!("search_requests_total", "outcome" => "created").increment(1);
    info!(target: "analyze", keyword, results = results.len(), id = %entry.id, "on-demand entry created");
    Ok(SearchOutcome::created(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(i: u32, image: Option<&str>) -> RawCandidate {
        RawCandidate {
            link: format!("https://n/{i}"),
            title: format!("t{i}"),
            snippet: format!("s{i}"),
            source: "news.example".into(),
            image_url: image.map(Into::into),
            discovered_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            category: Category::KPop,
        }
    }

    #[test]
    fn synthesized_candidate_combines_snippets() {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let c = synthesize("IVE", &[raw(1, None), raw(2, Some("https://img/2.jpg"))], now).unwrap();
        assert_eq!(c.link, "https://n/1");
        assert_eq!(c.snippet, "t1: s1\nt2: s2");
        assert_eq!(c.image_url.as_deref(), Some("https://img/2.jpg"));
        assert_eq!(c.discovered_at, now);
        assert!(synthesize("IVE", &[], now).is_none());
    }

    #[test]
    fn outcome_shapes() {
        let v = serde_json::to_value(SearchOutcome::not_found()).unwrap();
        assert_eq!(v["found"], false);
        assert_eq!(v["message"], NO_RESULTS_MESSAGE);
    }
}
