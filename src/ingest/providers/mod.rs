pub mod google_cse;
pub mod naver_news;

use std::sync::Arc;

use crate::config::ProvidersConfig;
use crate::ingest::types::SearchProvider;

pub use google_cse::GoogleCseProvider;
pub use naver_news::NaverNewsProvider;

/// Build the configured HTTP providers; unconfigured ones are left out with a warning.
pub fn from_config(cfg: &ProvidersConfig, client: &reqwest::Client) -> Vec<Arc<dyn SearchProvider>> {
    let mut out: Vec<Arc<dyn SearchProvider>> = Vec::new();
    if cfg.google_configured() {
        out.push(Arc::new(GoogleCseProvider::new(
            client.clone(),
            &cfg.google_base_url,
            &cfg.google_api_key,
            &cfg.google_engine_id,
        )));
    } else {
        tracing::warn!(target: "ingest", provider = "Google", "credentials missing, provider disabled");
    }
    if cfg.naver_configured() {
        out.push(Arc::new(NaverNewsProvider::new(
            client.clone(),
            &cfg.naver_base_url,
            &cfg.naver_client_id,
            &cfg.naver_client_secret,
        )));
    } else {
        tracing::warn!(target: "ingest", provider = "Naver", "credentials missing, provider disabled");
    }
    out
}
