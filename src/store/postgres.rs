// src/store/postgres.rs
//! PostgreSQL store. Publication is a single UPDATE, so readers see a batch either
//! fully published or not at all; vote increments are in-place `col = col + 1` updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use super::{matches_subject, Store, UpsertReport};
use crate::error::{PipelineError, Result};
use crate::model::{
    Category, EnrichedArticle, Origin, RankedEntry, RawCandidate, StageStatus, StagedCandidate,
    Vibe, VoteColumn,
};
use crate::schedule::Phase;

const SCHEMA: &str = include_str!("../../migrations/0001_pipeline.sql");

const ENTRY_COLUMNS: &str = "id, source_link, title, artist, summary, keywords, vibe, category, \
     source, image_url, discovered_at, analyzed_at, published_at, origin, rank, score, likes, dislikes";

const STAGED_COLUMNS: &str =
    "link, title, snippet, source, image_url, category, discovered_at, status, attempts, updated_at";

pub struct PgStore {
    pool: PgPool,
}

/// Escape LIKE/ILIKE wildcard characters in user input.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn decode_err(what: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Store(format!("decoding {what}: {e}"))
}

fn staged_from_row(row: &PgRow) -> Result<StagedCandidate> {
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(StagedCandidate {
        candidate: RawCandidate {
            link: row.try_get("link")?,
            title: row.try_get("title")?,
            snippet: row.try_get("snippet")?,
            source: row.try_get("source")?,
            image_url: row.try_get("image_url")?,
            discovered_at: row.try_get("discovered_at")?,
            category: category.parse().map_err(|e| decode_err("category", e))?,
        },
        status: status.parse().map_err(|e| decode_err("status", e))?,
        attempts: attempts.max(0) as u32,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<RankedEntry> {
    let category: String = row.try_get("category")?;
    let origin: String = row.try_get("origin")?;
    let Json(keywords): Json<Vec<String>> = row.try_get("keywords")?;
    let Json(vibe): Json<Vibe> = row.try_get("vibe")?;
    let rank: Option<i32> = row.try_get("rank")?;
    let likes: i64 = row.try_get("likes")?;
    let dislikes: i64 = row.try_get("dislikes")?;
    Ok(RankedEntry {
        id: row.try_get("id")?,
        article: EnrichedArticle {
            source_link: row.try_get("source_link")?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            summary: row.try_get("summary")?,
            keywords,
            vibe,
            category: category.parse().map_err(|e| decode_err("category", e))?,
            source: row.try_get("source")?,
            image_url: row.try_get("image_url")?,
            discovered_at: row.try_get("discovered_at")?,
            analyzed_at: row.try_get("analyzed_at")?,
            published_at: row.try_get("published_at")?,
            origin: match origin.as_str() {
                "on_demand" => Origin::OnDemand,
                _ => Origin::Scheduled,
            },
        },
        rank: rank.map(|r| r.max(0) as u32),
        score: row.try_get("score")?,
        likes: likes.max(0) as u64,
        dislikes: dislikes.max(0) as u64,
    })
}

fn origin_str(o: Origin) -> &'static str {
    match o {
        Origin::Scheduled => "scheduled",
        Origin::OnDemand => "on_demand",
    }
}

impl PgStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!(target: "store", "postgres schema ready");
        Ok(Self { pool })
    }

    async fn entries_where(&self, clause: &str, category: Option<Category>) -> Result<Vec<RankedEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM live_news WHERE {clause} AND ($1::text IS NULL OR category = $1)"
        );
        let rows = sqlx::query(&sql)
            .bind(category.map(|c| c.label()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }
}

macro_rules! insert_entry_sql {
    ($tail:literal) => {
        concat!(
            "INSERT INTO live_news \
             (id, source_link, title, artist, summary, keywords, vibe, category, source, image_url, \
              discovered_at, analyzed_at, is_published, published_at, origin, rank, score, likes, dislikes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
            $tail
        )
    };
}

/// One `live_news` insert with every column bound.
fn insert_entry<'q>(
    sql: &'static str,
    e: &'q RankedEntry,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let a = &e.article;
    sqlx::query(sql)
        .bind(e.id)
        .bind(&a.source_link)
        .bind(&a.title)
        .bind(&a.artist)
        .bind(&a.summary)
        .bind(Json(&a.keywords))
        .bind(Json(a.vibe))
        .bind(a.category.label())
        .bind(&a.source)
        .bind(&a.image_url)
        .bind(a.discovered_at)
        .bind(a.analyzed_at)
        .bind(a.is_published())
        .bind(a.published_at)
        .bind(origin_str(a.origin))
        .bind(e.rank.map(|r| r as i32))
        .bind(e.score)
        .bind(e.likes as i64)
        .bind(e.dislikes as i64)
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_candidates(
        &self,
        candidates: &[RawCandidate],
        now: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = UpsertReport::default();
        for c in candidates {
            let inserted: bool = sqlx::query_scalar(
                "INSERT INTO raw_news \
                 (link, title, snippet, source, image_url, category, discovered_at, status, attempts, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8) \
                 ON CONFLICT (link) DO UPDATE SET \
                   title = EXCLUDED.title, snippet = EXCLUDED.snippet, \
                   image_url = EXCLUDED.image_url, updated_at = EXCLUDED.updated_at \
                 RETURNING (xmax = 0)",
            )
            .bind(&c.link)
            .bind(&c.title)
            .bind(&c.snippet)
            .bind(&c.source)
            .bind(&c.image_url)
            .bind(c.category.label())
            .bind(c.discovered_at)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            if inserted {
                report.inserted += 1;
            } else {
                report.updated += 1;
            }
        }
        tx.commit().await?;
        Ok(report)
    }

    async fn next_batch(&self, limit: usize) -> Result<Vec<StagedCandidate>> {
        let sql = format!(
            "SELECT {STAGED_COLUMNS} FROM raw_news WHERE status = 'pending' \
             ORDER BY discovered_at ASC, link ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(staged_from_row).collect()
    }

    async fn staged_candidates(&self) -> Result<Vec<StagedCandidate>> {
        let sql = format!("SELECT {STAGED_COLUMNS} FROM raw_news");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(staged_from_row).collect()
    }

    async fn commit_enriched(&self, entry: &RankedEntry, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let sql = insert_entry_sql!(" ON CONFLICT (source_link) WHERE origin = 'scheduled' DO NOTHING");
        let res = insert_entry(sql, entry).execute(&mut *tx).await?;
        let inserted = res.rows_affected() == 1;
        sqlx::query("UPDATE raw_news SET status = 'enriched', updated_at = $2 WHERE link = $1")
            .bind(&entry.article.source_link)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_failure(
        &self,
        link: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<StageStatus> {
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE raw_news SET attempts = attempts + 1, updated_at = $3, \
               status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE status END \
             WHERE link = $1 RETURNING status",
        )
        .bind(link)
        .bind(max_attempts as i32)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        let status = status.ok_or_else(|| PipelineError::Store(format!("no staged row for {link}")))?;
        status.parse().map_err(|e| decode_err("status", e))
    }

    async fn prune_staging(&self, before: DateTime<Utc>) -> Result<usize> {
        let res = sqlx::query(
            "DELETE FROM raw_news r WHERE r.status <> 'pending' AND r.updated_at < $1 \
             AND NOT EXISTS (SELECT 1 FROM live_news l \
                             WHERE l.source_link = r.link AND l.origin = 'scheduled')",
        )
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() as usize)
    }

    async fn insert_entries(&self, entries: &[RankedEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for e in entries {
            insert_entry(insert_entry_sql!(""), e).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn pending_entries(&self, category: Option<Category>) -> Result<Vec<RankedEntry>> {
        self.entries_where("NOT is_published", category).await
    }

    async fn set_ranks(&self, ranks: &[(Uuid, u32)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (id, rank) in ranks {
            let res = sqlx::query("UPDATE live_news SET rank = $2 WHERE id = $1")
                .bind(id)
                .bind(*rank as i32)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                // dropping tx rolls back
                return Err(PipelineError::NotFound(*id));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn publish_pending(&self, at: DateTime<Utc>) -> Result<usize> {
        let res = sqlx::query(
            "UPDATE live_news SET is_published = TRUE, published_at = $1 WHERE NOT is_published",
        )
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Publication(e.to_string()))?;
        Ok(res.rows_affected() as usize)
    }

    async fn published(&self, category: Option<Category>) -> Result<Vec<RankedEntry>> {
        self.entries_where("is_published", category).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<RankedEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM live_news WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find_by_subject(&self, keyword: &str) -> Result<Option<RankedEntry>> {
        let k = keyword.trim();
        if k.is_empty() {
            return Ok(None);
        }
        let pattern = format!("%{}%", escape_like(k));
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM live_news WHERE artist ILIKE $1 \
             ORDER BY is_published DESC, analyzed_at DESC, id"
        );
        let rows = sqlx::query(&sql)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        // ILIKE narrows; whole-word matching is applied here
        for row in &rows {
            let entry = entry_from_row(row)?;
            if matches_subject(&entry, k) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn increment_vote(&self, id: Uuid, column: VoteColumn) -> Result<u64> {
        // column comes from a closed enum, never from user text
        let sql = match column {
            VoteColumn::Likes => "UPDATE live_news SET likes = likes + 1 WHERE id = $1 RETURNING likes",
            VoteColumn::Dislikes => {
                "UPDATE live_news SET dislikes = dislikes + 1 WHERE id = $1 RETURNING dislikes"
            }
        };
        let v: Option<i64> = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        v.map(|n| n.max(0) as u64).ok_or(PipelineError::NotFound(id))
    }

    async fn delete_entries(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = sqlx::query("DELETE FROM live_news WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() as usize)
    }

    async fn last_run(&self, phase: Phase) -> Result<Option<DateTime<Utc>>> {
        let v: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_run FROM phase_runs WHERE phase = $1")
                .bind(phase.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(v)
    }

    async fn record_run(&self, phase: Phase, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO phase_runs (phase, last_run) VALUES ($1, $2) \
             ON CONFLICT (phase) DO UPDATE SET last_run = EXCLUDED.last_run",
        )
        .bind(phase.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
    }
}
