// src/model.rs
//! Data contracts shared by every pipeline stage: staged candidates, enriched articles,
//! ranked entries, categories and the vibe vector.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Closed set of feed categories. `All` is a read-side view, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    KPop,
    KDrama,
    KMovie,
    KEntertain,
    KCulture,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::KPop,
        Category::KDrama,
        Category::KMovie,
        Category::KEntertain,
        Category::KCulture,
    ];

    /// Canonical display label; the only casing that ever leaves the data model.
    pub fn label(self) -> &'static str {
        match self {
            Category::KPop => "K-Pop",
            Category::KDrama => "K-Drama",
            Category::KMovie => "K-Movie",
            Category::KEntertain => "K-Entertain",
            Category::KCulture => "K-Culture",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Accepts `K-Pop`, `k-pop`, `K-POP`, `kpop`, `K Pop`...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "kpop" => Ok(Category::KPop),
            "kdrama" => Ok(Category::KDrama),
            "kmovie" => Ok(Category::KMovie),
            "kentertain" | "kentertainment" => Ok(Category::KEntertain),
            "kculture" => Ok(Category::KCulture),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One scraped search result before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    /// Canonical link; unique key of the staging set.
    pub link: String,
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub image_url: Option<String>,
    pub discovered_at: DateTime<Utc>,
    /// Category of the query that surfaced this candidate.
    pub category: Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Enriched,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Enriched => "enriched",
            StageStatus::Failed => "failed",
        }
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "enriched" => Ok(StageStatus::Enriched),
            "failed" => Ok(StageStatus::Failed),
            other => Err(format!("unknown stage status: {other}")),
        }
    }
}

/// A staged row: the candidate plus its consumption bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedCandidate {
    pub candidate: RawCandidate,
    pub status: StageStatus,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

/// Three independent intensity scores, each in [0,100]. They do not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vibe {
    pub excitement: f32,
    pub shock: f32,
    pub sadness: f32,
}

impl Vibe {
    pub fn new(excitement: f32, shock: f32, sadness: f32) -> Self {
        Self {
            excitement,
            shock,
            sadness,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        let c = |v: f32| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 };
        Self {
            excitement: c(self.excitement),
            shock: c(self.shock),
            sadness: c(self.sadness),
        }
    }
}

/// How a record entered the article table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Scheduled,
    OnDemand,
}

/// The LLM-derived structured view of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub source_link: String,
    pub title: String,
    pub artist: String,
    pub summary: String,
    /// Ordered, each prefixed with `#`.
    pub keywords: Vec<String>,
    pub vibe: Vibe,
    pub category: Category,
    pub source: String,
    pub image_url: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub analyzed_at: DateTime<Utc>,
    /// `Some` if and only if the article is published.
    pub published_at: Option<DateTime<Utc>>,
    pub origin: Origin,
}

impl EnrichedArticle {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

/// An enriched article plus its display position and reader votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub article: EnrichedArticle,
    /// Dense 1-based rank within (category, publication epoch). `None` for on-demand rows.
    pub rank: Option<u32>,
    pub score: f32,
    pub likes: u64,
    pub dislikes: u64,
}

impl RankedEntry {
    pub fn new(article: EnrichedArticle, score: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            article,
            rank: None,
            score,
            likes: 0,
            dislikes: 0,
        }
    }
}

/// Which vote counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteColumn {
    Likes,
    Dislikes,
}

impl VoteColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteColumn::Likes => "likes",
            VoteColumn::Dislikes => "dislikes",
        }
    }
}

impl FromStr for VoteColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "likes" => Ok(VoteColumn::Likes),
            "dislikes" => Ok(VoteColumn::Dislikes),
            other => Err(format!("column_name must be likes or dislikes, got '{other}'")),
        }
    }
}
