// src/ingest/types.rs
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Category, RawCandidate};

/// One provider query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub category: Category,
    pub count: u32,
    /// Provider-specific recency window (`d1`, `y1`); ignored by providers without one.
    pub date_window: Option<String>,
    /// Stamped on every candidate produced by this request.
    pub discovered_at: DateTime<Utc>,
}

/// A search backend normalized to the candidate shape. Implementations strip markup
/// and never fail a whole response because one item lacks an image.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<RawCandidate>>;
    fn name(&self) -> &'static str;
}
