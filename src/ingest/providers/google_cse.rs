// src/ingest/providers/google_cse.rs
//! Provider A: Google Custom Search JSON API.
//! Titles and snippets are plain text; thumbnails come from `pagemap.cse_image`.

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::ingest::build_candidate;
use crate::ingest::types::{SearchProvider, SearchRequest};
use crate::model::RawCandidate;

const NAME: &str = "Google";

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CseItem {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
    display_link: Option<String>,
    pagemap: Option<PageMap>,
}

#[derive(Debug, Deserialize)]
struct PageMap {
    #[serde(default)]
    cse_image: Vec<CseImage>,
    #[serde(default)]
    cse_thumbnail: Vec<CseImage>,
}

#[derive(Debug, Deserialize)]
struct CseImage {
    src: Option<String>,
}

impl CseItem {
    fn image(&self) -> Option<String> {
        let pm = self.pagemap.as_ref()?;
        pm.cse_image
            .iter()
            .chain(pm.cse_thumbnail.iter())
            .find_map(|i| i.src.clone())
    }
}

pub struct GoogleCseProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        engine_id: String,
    },
}

impl GoogleCseProvider {
    /// Parse a stored response body instead of calling the API.
    pub fn from_fixture(body: &str) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        engine_id: impl Into<String>,
    ) -> Self {
        Self {
            mode: Mode::Http {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key: api_key.into(),
                engine_id: engine_id.into(),
            },
        }
    }

    fn parse_items_from_str(body: &str, req: &SearchRequest) -> Result<Vec<RawCandidate>> {
        let resp: CseResponse = serde_json::from_str(body)
            .map_err(|e| PipelineError::provider(NAME, format!("malformed response: {e}")))?;

        let out: Vec<RawCandidate> = resp
            .items
            .iter()
            .filter_map(|it| {
                let source = it
                    .display_link
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(NAME)
                    .to_string();
                build_candidate(
                    req,
                    it.link.as_deref(),
                    it.title.as_deref(),
                    it.snippet.as_deref(),
                    source,
                    it.image(),
                )
            })
            .collect();

        counter!("ingest_provider_items_total", "provider" => NAME).increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SearchProvider for GoogleCseProvider {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<RawCandidate>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s, req),
            Mode::Http {
                client,
                base_url,
                api_key,
                engine_id,
            } => {
                // CSE caps `num` at 10
                let num = req.count.clamp(1, 10).to_string();
                let mut params: Vec<(&str, &str)> = vec![
                    ("key", api_key.as_str()),
                    ("cx", engine_id.as_str()),
                    ("q", req.query.as_str()),
                    ("num", num.as_str()),
                ];
                if let Some(w) = req.date_window.as_deref() {
                    params.push(("dateRestrict", w));
                }

                let resp = client
                    .get(format!("{base_url}/customsearch/v1"))
                    .query(&params)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use chrono::Utc;

    fn req() -> SearchRequest {
        SearchRequest {
            query: "K-POP comeback".into(),
            category: Category::KPop,
            count: 5,
            date_window: Some("d1".into()),
            discovered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn maps_fields_and_best_effort_image() {
        let body = r#"{
            "items": [
              {"title": "aespa returns", "link": "https://a.example/1", "snippet": "Supernova &amp; more",
               "displayLink": "a.example", "pagemap": {"cse_image": [{"src": "https://img/1.jpg"}]}},
              {"title": "IVE tour", "link": "https://b.example/2", "snippet": "dates",
               "displayLink": "b.example"},
              {"title": "", "link": "https://c.example/3"}
            ]
        }"#;
        let p = GoogleCseProvider::from_fixture(body);
        let got = p.search(&req()).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].source, "a.example");
        assert_eq!(got[0].snippet, "Supernova & more");
        assert_eq!(got[0].image_url.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(got[1].image_url, None);
        assert_eq!(got[1].category, Category::KPop);
    }

    #[tokio::test]
    async fn missing_items_is_empty_not_error() {
        let p = GoogleCseProvider::from_fixture(r#"{"searchInformation": {"totalResults": "0"}}"#);
        assert!(p.search(&req()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_provider_error() {
        let p = GoogleCseProvider::from_fixture("<html>quota</html>");
        let err = p.search(&req()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider { provider: "Google", .. }));
    }
}
