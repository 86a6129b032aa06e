// src/ingest/providers/naver_news.rs
//! Provider B: Naver news search. Titles and descriptions arrive HTML-escaped with
//! `<b>` highlight markup; there is no structured image field.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::ingest::{build_candidate, window_duration};
use crate::ingest::types::{SearchProvider, SearchRequest};
use crate::model::RawCandidate;

const NAME: &str = "Naver";
const SOURCE_LABEL: &str = "Naver News";

#[derive(Debug, Deserialize)]
struct NaverResponse {
    #[serde(default)]
    items: Vec<NaverItem>,
}

#[derive(Debug, Deserialize)]
struct NaverItem {
    title: Option<String>,
    #[serde(rename = "originallink")]
    original_link: Option<String>,
    link: Option<String>,
    description: Option<String>,
    /// RFC 2822, e.g. `Mon, 05 May 2025 09:12:00 +0900`.
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

impl NaverItem {
    /// Publisher URL when present, Naver's own link otherwise.
    fn canonical_source(&self) -> Option<&str> {
        self.original_link
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .or(self.link.as_deref())
    }

    fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.pub_date.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// The API has no date parameter, so the window is applied here. Items without a
    /// readable `pubDate` are dropped when a window is set.
    fn within(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        match cutoff {
            None => true,
            Some(c) => self.published_at().is_some_and(|at| at >= c),
        }
    }
}

pub struct NaverNewsProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        base_url: String,
        client_id: String,
        client_secret: String,
    },
}

impl NaverNewsProvider {
    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::Http {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client_id: client_id.into().trim().to_string(),
                client_secret: client_secret.into().trim().to_string(),
            },
        }
    }

    fn parse_items_from_str(body: &str, req: &SearchRequest) -> Result<Vec<RawCandidate>> {
        let resp: NaverResponse = serde_json::from_str(body)
            .map_err(|e| PipelineError::provider(NAME, format!("malformed response: {e}")))?;

        let cutoff = req
            .date_window
            .as_deref()
            .and_then(window_duration)
            .map(|w| req.discovered_at - w);
        let mut stale = 0usize;

        let out: Vec<RawCandidate> = resp
            .items
            .iter()
            .filter(|it| {
                let keep = it.within(cutoff);
                stale += usize::from(!keep);
                keep
            })
            .filter_map(|it| {
                build_candidate(
                    req,
                    it.canonical_source(),
                    it.title.as_deref(),
                    it.description.as_deref(),
                    SOURCE_LABEL.to_string(),
                    None,
                )
            })
            .collect();

        if stale > 0 {
            tracing::debug!(target: "ingest", provider = NAME, stale, "dropped items outside the date window");
        }
        counter!("ingest_provider_items_total", "provider" => NAME).increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SearchProvider for NaverNewsProvider {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<RawCandidate>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http {
                client,
                base_url,
                client_id,
                client_secret,
            } => {
                // display is capped at 100 by the API
                let display = req.count.clamp(1, 100).to_string();
                let resp = client
                    .get(format!("{base_url}/v1/search/news.json"))
                    .header("X-Naver-Client-Id", client_id)
                    .header("X-Naver-Client-Secret", client_secret)
                    .query(&[
                        ("query", req.query.as_str()),
                        ("display", display.as_str()),
                        ("sort", "sim"),
                    ])
                    .send()
                    .await
                    .map_err(|e| PipelineError::provider(NAME, format!("http get: {e}")))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(PipelineError::from_status(NAME, status));
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| PipelineError::provider(NAME, format!("http body: {e}")))?;
                Self::parse_items_from_str(&body, req)
            }
        }
    }

    fn name(&self) -> &'static str {
        NAME
    }
}
