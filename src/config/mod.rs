// src/config/mod.rs
//! Pipeline configuration: one TOML file with serde defaults, secrets resolved from the
//! environment. Built once at startup and handed to every component by reference.

pub mod ai;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Category;
use crate::vibe::VibePolicy;

pub use ai::LlmConfig;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// A literal "ENV" value is replaced by `$var` (empty when unset).
pub(crate) fn resolve_env_field(value: &str, var: &str) -> String {
    if value.trim().eq_ignore_ascii_case("env") {
        std::env::var(var).unwrap_or_default().trim().to_string()
    } else {
        value.to_string()
    }
}

fn env_marker() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bearer secret of the scheduled entry point. "ENV" → CRON_SECRET.
    #[serde(default = "env_marker")]
    pub cron_secret: String,
    /// Only used with the `postgres` feature. "ENV" → DATABASE_URL.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analyze: AnalyzeConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub vibe_policy: VibePolicy,
    #[serde(default = "default_queries")]
    pub queries: Vec<CategoryQuery>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cron_secret: env_marker(),
            database_url: None,
            providers: ProvidersConfig::default(),
            llm: LlmConfig::default(),
            analyze: AnalyzeConfig::default(),
            ranking: RankingConfig::default(),
            retention: RetentionConfig::default(),
            schedule: ScheduleConfig::default(),
            vibe_policy: VibePolicy::default(),
            queries: default_queries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryQuery {
    pub category: Category,
    pub query: String,
}

fn default_queries() -> Vec<CategoryQuery> {
    let q = |category, query: &str| CategoryQuery {
        category,
        query: query.to_string(),
    };
    vec![
        q(Category::KPop, "K-POP (idol OR group) comeback OR debut"),
        q(Category::KPop, "음원 순위"),
        q(Category::KDrama, "드라마 시청률"),
        q(Category::KDrama, "넷플릭스 한국 드라마"),
        q(Category::KMovie, "박스오피스"),
        q(Category::KMovie, "영화 개봉"),
        q(Category::KEntertain, "예능 시청률"),
        q(Category::KEntertain, "OTT 예능 신작"),
        q(Category::KCulture, "추천 여행지"),
        q(Category::KCulture, "축제 행사"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub google_base_url: String,
    /// "ENV" → GOOGLE_SEARCH_API_KEY
    pub google_api_key: String,
    /// "ENV" → GOOGLE_SEARCH_ENGINE_ID
    pub google_engine_id: String,
    pub naver_base_url: String,
    /// "ENV" → NAVER_CLIENT_ID
    pub naver_client_id: String,
    /// "ENV" → NAVER_CLIENT_SECRET
    pub naver_client_secret: String,
    pub result_count: u32,
    /// Provider date restriction for the scheduled scrape (`d1` = last day).
    pub date_window: String,
    /// Wider window for the on-demand path (`y1` = last year).
    pub on_demand_window: String,
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            google_base_url: "https://www.googleapis.com".to_string(),
            google_api_key: env_marker(),
            google_engine_id: env_marker(),
            naver_base_url: "https://openapi.naver.com".to_string(),
            naver_client_id: env_marker(),
            naver_client_secret: env_marker(),
            result_count: 5,
            date_window: "d1".to_string(),
            on_demand_window: "y1".to_string(),
            timeout_secs: 8,
        }
    }
}

impl ProvidersConfig {
    pub fn google_configured(&self) -> bool {
        !self.google_api_key.is_empty() && !self.google_engine_id.is_empty()
    }

    pub fn naver_configured(&self) -> bool {
        !self.naver_client_id.is_empty() && !self.naver_client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeConfig {
    pub batch_size: usize,
    /// Parse failures before a staged row is parked as failed.
    pub max_attempts: u32,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub engagement_weight: f32,
    pub recency_weight: f32,
    pub recency_half_life_hours: f32,
    pub excitement_weight: f32,
    pub shock_weight: f32,
    pub sadness_weight: f32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            engagement_weight: 0.7,
            recency_weight: 0.3,
            recency_half_life_hours: 12.0,
            excitement_weight: 0.5,
            shock_weight: 0.3,
            sadness_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_items_per_category: usize,
    pub max_age_hours: i64,
    /// Consumed staging rows older than this are pruned.
    pub staging_age_hours: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_items_per_category: 30,
            max_age_hours: 24,
            staging_age_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Upper bound of the random delay before scrape calls.
    pub jitter_max_secs: u64,
    /// Run a missed phase during the next standby minute.
    pub catch_up_missed: bool,
    /// Drive ticks from an in-process interval instead of an external trigger. 0 disables it.
    pub internal_tick_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            jitter_max_secs: 240,
            catch_up_missed: false,
            internal_tick_secs: 0,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then resolve secrets:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from_file(&p)?
            } else {
                Self::default()
            }
        };
        cfg.resolve_env()?;
        Ok(cfg)
    }

    /// Replace "ENV" markers by environment values. A missing cron secret is fatal;
    /// missing provider keys only disable that provider.
    pub fn resolve_env(&mut self) -> Result<()> {
        self.cron_secret = resolve_env_field(&self.cron_secret, "CRON_SECRET");
        if self.cron_secret.is_empty() {
            bail!("Missing CRON_SECRET env var");
        }
        self.database_url = match self.database_url.take() {
            Some(v) => Some(resolve_env_field(&v, "DATABASE_URL")).filter(|v| !v.is_empty()),
            None => std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
        };

        let p = &mut self.providers;
        p.google_api_key = resolve_env_field(&p.google_api_key, "GOOGLE_SEARCH_API_KEY");
        p.google_engine_id = resolve_env_field(&p.google_engine_id, "GOOGLE_SEARCH_ENGINE_ID");
        p.naver_client_id = resolve_env_field(&p.naver_client_id, "NAVER_CLIENT_ID");
        p.naver_client_secret = resolve_env_field(&p.naver_client_secret, "NAVER_CLIENT_SECRET");

        self.llm.resolve_env();
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.analyze.batch_size == 0 {
            bail!("analyze.batch_size must be > 0");
        }
        if self.providers.result_count == 0 {
            bail!("providers.result_count must be > 0");
        }
        if self.ranking.recency_half_life_hours <= 0.0 {
            bail!("ranking.recency_half_life_hours must be > 0");
        }
        if self.queries.is_empty() {
            bail!("at least one [[queries]] entry is required");
        }
        Ok(())
    }

    /// Distinct categories in query order.
    pub fn query_categories(&self) -> Vec<Category> {
        let mut out: Vec<Category> = Vec::new();
        for q in &self.queries {
            if !out.contains(&q.category) {
                out.push(q.category);
            }
        }
        out
    }

    /// Category scraped during hour `hour`: rotates through configured categories.
    pub fn category_for_hour(&self, hour: u32) -> Category {
        let cats = self.query_categories();
        if cats.is_empty() {
            return Category::KPop;
        }
        cats[(hour as usize) % cats.len()]
    }

    pub fn queries_for(&self, category: Category) -> impl Iterator<Item = &str> {
        self.queries
            .iter()
            .filter(move |q| q.category == category)
            .map(|q| q.query.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            cron_secret = "s3cret"
            vibe_policy = "mean"

            [analyze]
            batch_size = 4

            [[queries]]
            category = "k-pop"
            query = "aespa"

            [[queries]]
            category = "K-DRAMA"
            query = "drama ratings"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analyze.batch_size, 4);
        assert_eq!(cfg.analyze.max_attempts, 3);
        assert_eq!(cfg.providers.result_count, 5);
        assert_eq!(cfg.vibe_policy, VibePolicy::Mean);
        assert_eq!(
            cfg.query_categories(),
            vec![Category::KPop, Category::KDrama]
        );
        assert_eq!(cfg.category_for_hour(0), Category::KPop);
        assert_eq!(cfg.category_for_hour(3), Category::KDrama);
        assert_eq!(cfg.queries_for(Category::KPop).collect::<Vec<_>>(), vec!["aespa"]);
    }

    #[test]
    fn shipped_config_parses() {
        let cfg = PipelineConfig::load_from_file(Path::new(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(cfg.query_categories().len(), Category::ALL.len());
        assert_eq!(cfg.schedule.internal_tick_secs, 0);
    }

    #[test]
    fn zero_batch_is_rejected() {
        let err = PipelineConfig::from_toml_str("[analyze]\nbatch_size = 0").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[serial_test::serial]
    #[test]
    fn env_markers_are_resolved() {
        env::set_var("CRON_SECRET", "from-env");
        env::set_var("NAVER_CLIENT_ID", "nid");
        env::set_var("NAVER_CLIENT_SECRET", "nsecret");
        env::remove_var("GOOGLE_SEARCH_API_KEY");
        env::remove_var("GOOGLE_SEARCH_ENGINE_ID");

        let mut cfg = PipelineConfig::default();
        cfg.resolve_env().unwrap();
        assert_eq!(cfg.cron_secret, "from-env");
        assert!(cfg.providers.naver_configured());
        assert!(!cfg.providers.google_configured());

        env::remove_var("CRON_SECRET");
        let mut missing = PipelineConfig::default();
        assert!(missing.resolve_env().is_err());

        env::remove_var("NAVER_CLIENT_ID");
        env::remove_var("NAVER_CLIENT_SECRET");
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_path_then_fallbacks() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("pipeline.toml");
        fs::write(&p, "cron_secret = \"file-secret\"\n[schedule]\njitter_max_secs = 0\n").unwrap();

        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.cron_secret, "file-secret");
        assert_eq!(cfg.schedule.jitter_max_secs, 0);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(PipelineConfig::load_default().is_err());
        env::remove_var(ENV_CONFIG_PATH);
    }
}
