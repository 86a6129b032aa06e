// src/store/mod.rs
//! Persistent-store contract. Three logical tables: staged candidates keyed by link,
//! ranked articles keyed by surrogate id, and the per-phase run ledger.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Category, Origin, RankedEntry, RawCandidate, StageStatus, StagedCandidate, VoteColumn,
};
use crate::schedule::Phase;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert by link. On conflict title/snippet/image are overwritten; discovery time,
    /// category and consumption state are preserved.
    async fn upsert_candidates(&self, candidates: &[RawCandidate], now: DateTime<Utc>)
        -> Result<UpsertReport>;

    /// Pending rows, oldest discovery first (link breaks ties), at most `limit`.
    async fn next_batch(&self, limit: usize) -> Result<Vec<StagedCandidate>>;

    async fn staged_candidates(&self) -> Result<Vec<StagedCandidate>>;

    /// Insert the entry for a staged link and mark that staging row enriched in one
    /// operation. When a scheduled entry already holds the same link nothing is
    /// inserted, the row is still marked, and `false` comes back.
    async fn commit_enriched(&self, entry: &RankedEntry, now: DateTime<Utc>) -> Result<bool>;

    /// Count a failed extraction; parks the row as failed at `max_attempts`.
    async fn record_failure(
        &self,
        link: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<StageStatus>;

    /// Drop enriched/failed staging rows last touched before `before`. Rows whose link
    /// still backs a scheduled entry are kept so a re-scrape does not requeue them.
    async fn prune_staging(&self, before: DateTime<Utc>) -> Result<usize>;

    async fn insert_entries(&self, entries: &[RankedEntry]) -> Result<()>;

    /// Unpublished entries, optionally for one category.
    async fn pending_entries(&self, category: Option<Category>) -> Result<Vec<RankedEntry>>;

    /// Apply a set of ranks in one operation.
    async fn set_ranks(&self, ranks: &[(Uuid, u32)]) -> Result<()>;

    /// Flip every unpublished entry to published and stamp `at`, all or nothing.
    /// Returns the number of entries published (0 when nothing is pending).
    async fn publish_pending(&self, at: DateTime<Utc>) -> Result<usize>;

    async fn published(&self, category: Option<Category>) -> Result<Vec<RankedEntry>>;

    async fn get(&self, id: Uuid) -> Result<Option<RankedEntry>>;

    /// Case-insensitive whole-word match on the subject (artist) only; published rows
    /// win over pending ones.
    async fn find_by_subject(&self, keyword: &str) -> Result<Option<RankedEntry>>;

    /// Add exactly one to a counter without touching rank or score. Returns the new value.
    async fn increment_vote(&self, id: Uuid, column: VoteColumn) -> Result<u64>;

    async fn delete_entries(&self, ids: &[Uuid]) -> Result<usize>;

    async fn last_run(&self, phase: Phase) -> Result<Option<DateTime<Utc>>>;

    async fn record_run(&self, phase: Phase, at: DateTime<Utc>) -> Result<()>;
}

/// A scheduled entry already exists for `link`.
pub(crate) fn holds_link(entry: &RankedEntry, link: &str) -> bool {
    entry.article.origin == Origin::Scheduled && entry.article.source_link == link
}

/// `true` when `keyword` occurs in the entry's subject as a whole word or phrase,
/// ignoring case. Titles are not consulted: a headline mentioning "live" is not a hit
/// for `IVE`.
pub(crate) fn matches_subject(entry: &RankedEntry, keyword: &str) -> bool {
    let k = keyword.trim().to_lowercase();
    if k.is_empty() {
        return false;
    }
    let artist = entry.article.artist.to_lowercase();
    artist.match_indices(&k).any(|(i, m)| {
        let before = artist[..i].chars().next_back();
        let after = artist[i + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
