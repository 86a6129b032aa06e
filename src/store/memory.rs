// src/store/memory.rs
//! In-process store. Every operation takes one lock, so each trait method is atomic
//! with respect to concurrent readers.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{holds_link, matches_subject, Store, UpsertReport};
use crate::error::{PipelineError, Result};
use crate::model::{Category, RankedEntry, RawCandidate, StageStatus, StagedCandidate, VoteColumn};
use crate::schedule::Phase;

#[derive(Default)]
struct Inner {
    staged: HashMap<String, StagedCandidate>,
    entries: HashMap<Uuid, RankedEntry>,
    ledger: HashMap<Phase, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    publish_fault: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next publish fail after preparing `index` rows. Used to exercise
    /// the all-or-nothing guarantee.
    pub fn fail_next_publish_at(&self, index: usize) {
        *self.publish_fault.lock() = Some(index);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_candidates(
        &self,
        candidates: &[RawCandidate],
        now: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        let mut g = self.inner.write();
        let mut report = UpsertReport::default();
        for c in candidates {
            match g.staged.entry(c.link.clone()) {
                Entry::Occupied(mut o) => {
                    let row = o.get_mut();
                    row.candidate.title = c.title.clone();
                    row.candidate.snippet = c.snippet.clone();
                    row.candidate.image_url = c.image_url.clone();
                    row.updated_at = now;
                    report.updated += 1;
                }
                Entry::Vacant(v) => {
                    v.insert(StagedCandidate {
                        candidate: c.clone(),
                        status: StageStatus::Pending,
                        attempts: 0,
                        updated_at: now,
                    });
                    report.inserted += 1;
                }
            }
        }
        Ok(report)
    }

    async fn next_batch(&self, limit: usize) -> Result<Vec<StagedCandidate>> {
        let g = self.inner.read();
        let mut rows: Vec<StagedCandidate> = g
            .staged
            .values()
            .filter(|r| r.status == StageStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.candidate
                .discovered_at
                .cmp(&b.candidate.discovered_at)
                .then_with(|| a.candidate.link.cmp(&b.candidate.link))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn staged_candidates(&self) -> Result<Vec<StagedCandidate>> {
        let g = self.inner.read();
        Ok(g.staged.values().cloned().collect())
    }

    async fn commit_enriched(&self, entry: &RankedEntry, now: DateTime<Utc>) -> Result<bool> {
        let mut g = self.inner.write();
        let link = entry.article.source_link.as_str();
        let fresh = !g.entries.values().any(|e| holds_link(e, link));
        if fresh {
            g.entries.insert(entry.id, entry.clone());
        }
        if let Some(row) = g.staged.get_mut(link) {
            row.status = StageStatus::Enriched;
            row.updated_at = now;
        }
        Ok(fresh)
    }

    async fn record_failure(
        &self,
        link: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<StageStatus> {
        let mut g = self.inner.write();
        let Some(row) = g.staged.get_mut(link) else {
            return Err(PipelineError::Store(format!("no staged row for {link}")));
        };
        row.attempts = row.attempts.saturating_add(1);
        if row.attempts >= max_attempts {
            row.status = StageStatus::Failed;
        }
        row.updated_at = now;
        Ok(row.status)
    }

    async fn prune_staging(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut g = self.inner.write();
        let Inner { staged, entries, .. } = &mut *g;
        let n = staged.len();
        staged.retain(|link, r| {
            r.status == StageStatus::Pending
                || r.updated_at >= before
                || entries.values().any(|e| holds_link(e, link))
        });
        Ok(n - staged.len())
    }

    async fn insert_entries(&self, entries: &[RankedEntry]) -> Result<()> {
        let mut g = self.inner.write();
        for e in entries {
            g.entries.insert(e.id, e.clone());
        }
        Ok(())
    }

    async fn pending_entries(&self, category: Option<Category>) -> Result<Vec<RankedEntry>> {
        let g = self.inner.read();
        Ok(g.entries
            .values()
            .filter(|e| !e.article.is_published())
            .filter(|e| category.map_or(true, |c| e.article.category == c))
            .cloned()
            .collect())
    }

    async fn set_ranks(&self, ranks: &[(Uuid, u32)]) -> Result<()> {
        let mut g = self.inner.write();
        if let Some((missing, _)) = ranks.iter().find(|(id, _)| !g.entries.contains_key(id)) {
            return Err(PipelineError::NotFound(*missing));
        }
        for (id, rank) in ranks {
            if let Some(e) = g.entries.get_mut(id) {
                e.rank = Some(*rank);
            }
        }
        Ok(())
    }

    async fn publish_pending(&self, at: DateTime<Utc>) -> Result<usize> {
        let mut g = self.inner.write();
        let fault = self.publish_fault.lock().take();

        // prepare the whole batch, then commit; a failure leaves nothing flipped
        let mut prepared: Vec<Uuid> = Vec::new();
        for (i, e) in g.entries.values().filter(|e| !e.article.is_published()).enumerate() {
            if fault == Some(i) {
                return Err(PipelineError::Publication(format!(
                    "store write failed after {i} of the pending rows"
                )));
            }
            prepared.push(e.id);
        }
        for id in &prepared {
            if let Some(e) = g.entries.get_mut(id) {
                e.article.published_at = Some(at);
            }
        }
        Ok(prepared.len())
    }

    async fn published(&self, category: Option<Category>) -> Result<Vec<RankedEntry>> {
        let g = self.inner.read();
        Ok(g.entries
            .values()
            .filter(|e| e.article.is_published())
            .filter(|e| category.map_or(true, |c| e.article.category == c))
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RankedEntry>> {
        Ok(self.inner.read().entries.get(&id).cloned())
    }

    async fn find_by_subject(&self, keyword: &str) -> Result<Option<RankedEntry>> {
        let g = self.inner.read();
        let mut hits: Vec<&RankedEntry> = g
            .entries
            .values()
            .filter(|e| matches_subject(e, keyword))
            .collect();
        // published first, then newest analysis
        hits.sort_by(|a, b| {
            b.article
                .is_published()
                .cmp(&a.article.is_published())
                .then_with(|| b.article.analyzed_at.cmp(&a.article.analyzed_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(hits.first().map(|e| (*e).clone()))
    }

    async fn increment_vote(&self, id: Uuid, column: VoteColumn) -> Result<u64> {
        let mut g = self.inner.write();
        let e = g.entries.get_mut(&id).ok_or(PipelineError::NotFound(id))?;
        let counter = match column {
            VoteColumn::Likes => &mut e.likes,
            VoteColumn::Dislikes => &mut e.dislikes,
        };
        *counter = counter.saturating_add(1);
        Ok(*counter)
    }

    async fn delete_entries(&self, ids: &[Uuid]) -> Result<usize> {
        let mut g = self.inner.write();
        Ok(ids.iter().filter(|id| g.entries.remove(*id).is_some()).count())
    }

    async fn last_run(&self, phase: Phase) -> Result<Option<DateTime<Utc>>> {
        Ok(self.inner.read().ledger.get(&phase).copied())
    }

    async fn record_run(&self, phase: Phase, at: DateTime<Utc>) -> Result<()> {
        self.inner.write().ledger.insert(phase, at);
        Ok(())
    }
}
