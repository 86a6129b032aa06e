// tests/common/mod.rs
//
// Shared fakes for integration tests: a scripted search provider, a fixed clock and
// a pipeline wired to the in-memory store.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tower::ServiceExt as _; // for `oneshot`

use kpulse_pipeline::analyze::ScriptedLlm;
use kpulse_pipeline::api::{self, AppState};
use kpulse_pipeline::config::{CategoryQuery, PipelineConfig};
use kpulse_pipeline::error::{PipelineError, Result};
use kpulse_pipeline::ingest::types::{SearchProvider, SearchRequest};
use kpulse_pipeline::model::{Category, RawCandidate};
use kpulse_pipeline::pipeline::{FixedClock, Pipeline};
use kpulse_pipeline::store::MemoryStore;

pub const SECRET: &str = "test-cron-secret";

/// Returns the same links for every request; counts calls.
pub struct FakeProvider {
    name: &'static str,
    links: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<SearchRequest>>,
}

impl FakeProvider {
    pub fn new(name: &'static str, links: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name,
            links: links.iter().map(|l| l.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            links: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeProvider {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<RawCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(req.clone());
        if self.fail {
            return Err(PipelineError::provider(self.name, "connection reset"));
        }
        Ok(self
            .links
            .iter()
            .map(|link| RawCandidate {
                link: link.clone(),
                title: format!("{} headline for {link}", self.name),
                snippet: format!("snippet {link}"),
                source: self.name.to_string(),
                image_url: None,
                discovered_at: req.discovered_at,
                category: req.category,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, h, m, 5).unwrap()
}

/// Valid extraction JSON.
pub fn good_json(artist: &str, excitement: u32) -> String {
    format!(
        r##"{{"artist":"{artist}","summary":"{artist} lights up the neon grid.","keywords":["#{artist}","#comeback"],"vibe":{{"excitement":{excitement},"shock":20,"sadness":5}}}}"##
    )
}

/// One K-Pop query, no jitter.
pub fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.cron_secret = SECRET.to_string();
    cfg.schedule.jitter_max_secs = 0;
    cfg.queries = vec![CategoryQuery {
        category: Category::KPop,
        query: "K-POP comeback".to_string(),
    }];
    cfg
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub llm: Arc<ScriptedLlm>,
    pub clock: Arc<FixedClock>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(
        cfg: PipelineConfig,
        providers: Vec<Arc<dyn SearchProvider>>,
        llm: ScriptedLlm,
        now: DateTime<Utc>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(llm);
        let clock = Arc::new(FixedClock::new(now));
        let pipeline = Pipeline::new(Arc::new(cfg), store.clone(), providers, llm.clone())
            .with_clock(clock.clone());
        Self {
            store,
            llm,
            clock,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn router(&self) -> Router {
        api::router(AppState::new(self.pipeline.clone()))
    }
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, v)
}

pub fn cron_request(token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri("/api/cron");
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::empty()).expect("build cron request")
}

pub fn json_post(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}
