// src/ingest/mod.rs
//! Scrape side of the pipeline: provider fan-out, text normalization and
//! in-scrape link collapsing. Staging itself lives in the store.

pub mod providers;
pub mod types;

use crate::error::{with_timeout, PipelineError};
use crate::ingest::types::{SearchProvider, SearchRequest};
use crate::model::RawCandidate;
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TITLE_MAX_CHARS: usize = 300;
pub const SNIPPET_MAX_CHARS: usize = 1500;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_candidates_total",
            "Candidates returned by providers after normalization."
        );
        describe_counter!(
            "ingest_duplicate_links_total",
            "Candidates collapsed because another provider returned the same link."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_histogram!("ingest_provider_ms", "Provider call time in milliseconds.");
    });
}

/// Normalize provider text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode (providers escape markup inside descriptions)
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags; a second decode handles double-escaped fragments like `&amp;lt;b&amp;gt;`
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z!][^>]*>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();
    if out.contains('&') || out.contains('<') {
        out = html_escape::decode_html_entities(&out).to_string();
        out = re_tags.replace_all(&out, "").to_string();
    }

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// Canonical staging key: no fragment, no tracking parameters, trimmed.
/// Unparseable links are returned trimmed as-is.
pub fn canonical_link(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = url::Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Length of a `dateRestrict`-style window (`d1`, `w2`, `m6`, `y1`).
pub fn window_duration(window: &str) -> Option<chrono::Duration> {
    let w = window.trim();
    let unit = w.chars().next()?;
    let n: i64 = w.get(1..)?.parse().ok().filter(|n| *n > 0)?;
    match unit.to_ascii_lowercase() {
        'd' => Some(chrono::Duration::days(n)),
        'w' => Some(chrono::Duration::weeks(n)),
        'm' => Some(chrono::Duration::days(30 * n)),
        'y' => Some(chrono::Duration::days(365 * n)),
        _ => None,
    }
}

/// Collapse candidates sharing a link; the first occurrence wins.
/// Returns (kept, collapsed_count).
pub fn collapse_duplicate_links(candidates: Vec<RawCandidate>) -> (Vec<RawCandidate>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(candidates.len());
    let mut collapsed = 0usize;
    for c in candidates {
        if seen.insert(c.link.clone()) {
            kept.push(c);
        } else {
            collapsed += 1;
        }
    }
    (kept, collapsed)
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub candidates: Vec<RawCandidate>,
    pub failures: Vec<ProviderFailure>,
    pub duplicates: usize,
}

/// Run every request against every provider. Providers run concurrently; one provider's
/// requests run in order and the provider is skipped for the rest of the cycle after
/// its first failure. Whatever succeeded is returned.
pub async fn run_scrape(
    providers: &[Arc<dyn SearchProvider>],
    requests: &[SearchRequest],
    call_timeout: Duration,
) -> ScrapeOutcome {
    ensure_metrics_described();

    let per_provider = providers.iter().map(|p| async move {
        let mut got: Vec<RawCandidate> = Vec::new();
        for req in requests {
            let t0 = Instant::now();
            let res = with_timeout(
                format!("{} search", p.name()),
                call_timeout,
                p.search(req),
            )
            .await;
            histogram!("ingest_provider_ms", "provider" => p.name())
                .record(t0.elapsed().as_secs_f64() * 1_000.0);

            match res {
                Ok(mut items) => {
                    tracing::debug!(
                        target: "ingest",
                        provider = p.name(),
                        query = %req.query,
                        items = items.len(),
                        "provider search ok"
                    );
                    got.append(&mut items);
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, provider = p.name(), "provider error, skipping for this cycle");
                    counter!("ingest_provider_errors_total", "provider" => p.name()).increment(1);
                    return (got, Some(ProviderFailure {
                        provider: p.name(),
                        error: e.to_string(),
                    }));
                }
            }
        }
        (got, None)
    });

    let mut all = Vec::new();
    let mut failures = Vec::new();
    for (mut got, failure) in join_all(per_provider).await {
        all.append(&mut got);
        failures.extend(failure);
    }

    let (candidates, duplicates) = collapse_duplicate_links(all);
    counter!("ingest_candidates_total").increment(candidates.len() as u64);
    counter!("ingest_duplicate_links_total").increment(duplicates as u64);

    ScrapeOutcome {
        candidates,
        failures,
        duplicates,
    }
}

/// Shared by providers: build a candidate or drop it when link/title end up empty.
pub(crate) fn build_candidate(
    req: &SearchRequest,
    link: Option<&str>,
    title: Option<&str>,
    snippet: Option<&str>,
    source: String,
    image_url: Option<String>,
) -> Option<RawCandidate> {
    let link = canonical_link(link.unwrap_or_default());
    let title = normalize_text(title.unwrap_or_default(), TITLE_MAX_CHARS);
    if link.is_empty() || title.is_empty() {
        return None;
    }
    Some(RawCandidate {
        link,
        title,
        snippet: normalize_text(snippet.unwrap_or_default(), SNIPPET_MAX_CHARS),
        source,
        image_url: image_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()),
        discovered_at: req.discovered_at,
        category: req.category,
    })
}

impl PipelineError {
    pub(crate) fn from_status(provider: &'static str, status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            PipelineError::RateLimited { provider }
        } else {
            PipelineError::provider(provider, format!("http status {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use chrono::Utc;

    #[test]
    fn normalize_text_strips_escaped_markup() {
        let s = "  &lt;b&gt;NewJeans&lt;/b&gt;&nbsp;&nbsp;drops &quot;How Sweet&quot;  ";
        assert_eq!(normalize_text(s, 100), "NewJeans drops \"How Sweet\"");
        assert_eq!(normalize_text("<b>IVE</b> tops chart", 100), "IVE tops chart");
        assert_eq!(normalize_text("abcdef", 3), "abc");
    }

    #[test]
    fn normalize_text_keeps_comparisons() {
        assert_eq!(normalize_text("ratings 5 < 7 today", 100), "ratings 5 < 7 today");
    }

    #[test]
    fn date_windows_parse() {
        assert_eq!(window_duration("d1"), Some(chrono::Duration::hours(24)));
        assert_eq!(window_duration("y1"), Some(chrono::Duration::days(365)));
        assert_eq!(window_duration("w2"), Some(chrono::Duration::days(14)));
        assert_eq!(window_duration("d0"), None);
        assert_eq!(window_duration("x1"), None);
        assert_eq!(window_duration(""), None);
    }

    #[test]
    fn canonical_link_drops_fragment_and_tracking() {
        assert_eq!(
            canonical_link(" https://news.example.com/a?id=3&utm_source=x#top "),
            "https://news.example.com/a?id=3"
        );
        assert_eq!(
            canonical_link("https://news.example.com/a?utm_medium=y"),
            "https://news.example.com/a"
        );
        assert_eq!(canonical_link("not a url"), "not a url");
    }

    #[test]
    fn candidates_without_link_or_title_are_dropped() {
        let req = SearchRequest {
            query: "q".into(),
            category: Category::KPop,
            count: 5,
            date_window: None,
            discovered_at: Utc::now(),
        };
        assert!(build_candidate(&req, None, Some("t"), None, "s".into(), None).is_none());
        assert!(build_candidate(&req, Some("https://a"), Some("<br>"), None, "s".into(), None).is_none());
        let c = build_candidate(
            &req,
            Some("https://a.example/x"),
            Some("t"),
            None,
            "s".into(),
            Some("  ".into()),
        )
        .unwrap();
        assert_eq!(c.image_url, None);
        assert_eq!(c.snippet, "");
    }
}
