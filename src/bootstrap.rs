// src/bootstrap.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tracing::{info, warn};

use crate::analyze::{GroqClient, LlmClient};
use crate::api::{self, AppState};
use crate::config::PipelineConfig;
use crate::ingest::providers;
use crate::metrics::Metrics;
use crate::pipeline::{spawn_ticker, Pipeline};
use crate::store::{MemoryStore, Store};

/// Everything the service needs, built once from configuration.
pub struct Runtime {
    pub pipeline: Arc<Pipeline>,
}

#[cfg(feature = "postgres")]
async fn build_store(cfg: &PipelineConfig) -> anyhow::Result<Arc<dyn Store>> {
    if let Some(url) = cfg.database_url.as_deref() {
        let store = crate::store::PgStore::connect(url)
            .await
            .context("connecting to postgres")?;
        info!(target: "store", "using postgres store");
        return Ok(Arc::new(store));
    }
    info!(target: "store", "using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(not(feature = "postgres"))]
async fn build_store(cfg: &PipelineConfig) -> anyhow::Result<Arc<dyn Store>> {
    if cfg.database_url.is_some() {
        warn!(target: "store", "DATABASE_URL is set but the postgres feature is off; using the in-memory store");
    }
    info!(target: "store", "using in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

impl Runtime {
    pub async fn from_config(cfg: PipelineConfig) -> anyhow::Result<Self> {
        // Safe diagnostics: presence and lengths only
        info!(
            cron_secret_len = cfg.cron_secret.len(),
            google = cfg.providers.google_configured(),
            naver = cfg.providers.naver_configured(),
            llm_key_len = cfg.llm.api_key.len(),
            extraction_model = %cfg.llm.extraction_model,
            categories = cfg.query_categories().len(),
            "pipeline config loaded"
        );
        if cfg.llm.api_key.is_empty() {
            warn!("GROQ_API_KEY missing: every extraction will fail until it is set");
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("kpulse-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building http client")?;
        let providers = providers::from_config(&cfg.providers, &http);
        let llm: Arc<dyn LlmClient> =
            Arc::new(GroqClient::from_config(&cfg.llm).context("building llm client")?);
        let store = build_store(&cfg).await?;

        let pipeline = Pipeline::new(Arc::new(cfg), store, providers, llm);
        Ok(Self {
            pipeline: Arc::new(pipeline),
        })
    }

    /// Load config from the default locations and environment.
    pub async fn from_env() -> anyhow::Result<Self> {
        let cfg = PipelineConfig::load_default()?;
        Self::from_config(cfg).await
    }

    /// HTTP surface, plus `/metrics` when a recorder is installed.
    pub fn router(&self, metrics: Option<&Metrics>) -> Router {
        let app = api::router(AppState::new(self.pipeline.clone()));
        match metrics {
            Some(m) => app.merge(m.router()),
            None => app,
        }
    }

    /// Start the in-process ticker when configured; otherwise ticks come from `/api/cron`.
    pub fn start_background(&self) {
        let every = self.pipeline.config().schedule.internal_tick_secs;
        if every == 0 {
            return;
        }
        info!(every_secs = every, "internal ticker enabled");
        spawn_ticker(self.pipeline.clone(), Duration::from_secs(every));
    }
}
