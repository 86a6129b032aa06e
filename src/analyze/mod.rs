// src/analyze/mod.rs
//! Extraction side of the pipeline. Both the scheduled batch and the on-demand search
//! go through [`ExtractionWorker::ingest_one`], so the JSON contract and its error
//! handling exist once.

pub mod extract;
pub mod llm;
pub mod on_demand;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, PipelineConfig};
use crate::error::{with_timeout, Result};
use crate::model::{EnrichedArticle, Origin, RankedEntry, RawCandidate, StageStatus};
use crate::rank;
use crate::store::Store;

pub use extract::{parse_extraction, ExtractionPayload};
pub use llm::{ChatMessage, ChatRequest, GroqClient, LlmClient, ScriptedLlm};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analyze_items_total", "Extraction attempts by outcome.");
        describe_counter!("analyze_parked_total", "Staged rows parked after repeated failures.");
        describe_histogram!("analyze_llm_ms", "LLM round-trip time in milliseconds.");
    });
}

/// How one item enters the article table.
#[derive(Debug, Clone)]
pub enum IngestMode {
    /// Staged candidate from a scrape; stays unpublished until the next publish window.
    Scheduled,
    /// Ad hoc subject from a reader search; published on insert, never ranked.
    OnDemand { subject: String },
}

pub struct ExtractionWorker {
    llm: Arc<dyn LlmClient>,
    cfg: LlmConfig,
}

impl ExtractionWorker {
    pub fn new(llm: Arc<dyn LlmClient>, cfg: LlmConfig) -> Self {
        Self { llm, cfg }
    }

    pub fn llm_name(&self) -> &'static str {
        self.llm.name()
    }

    /// One LLM call, bounded by the configured timeout, parsed against the extraction
    /// contract. Parse failures are never retried here.
    pub async fn ingest_one(
        &self,
        candidate: &RawCandidate,
        mode: &IngestMode,
        now: DateTime<Utc>,
    ) -> Result<EnrichedArticle> {
        ensure_metrics_described();

        let (messages, models) = match mode {
            IngestMode::Scheduled => (
                extract::extraction_messages(&candidate.title, &candidate.snippet),
                self.cfg.extraction_models(),
            ),
            IngestMode::OnDemand { subject } => (
                extract::on_demand_messages(subject, &candidate.snippet),
                self.cfg.summary_models(),
            ),
        };
        let req = ChatRequest {
            messages,
            models,
            json_mode: true,
            temperature: self.cfg.temperature,
        };

        let t0 = Instant::now();
        let text = with_timeout(
            "llm completion",
            Duration::from_secs(self.cfg.timeout_secs),
            self.llm.complete(&req),
        )
        .await;
        histogram!("analyze_llm_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        let payload = parse_extraction(&text?)?;

        let (artist, keywords, published_at, origin) = match mode {
            IngestMode::Scheduled => (payload.artist, payload.keywords, None, Origin::Scheduled),
            IngestMode::OnDemand { subject } => {
                let subject = subject.trim().to_string();
                let mut keywords = payload.keywords;
                if let Some(tag) = extract::normalize_hashtag(&subject) {
                    if !keywords.iter().any(|k| k.eq_ignore_ascii_case(&tag)) {
                        keywords.insert(0, tag);
                    }
                }
                keywords.truncate(extract::MAX_KEYWORDS - 1);
                keywords.push("#AIGenerated".to_string());
                (subject, keywords, Some(now), Origin::OnDemand)
            }
        };

        Ok(EnrichedArticle {
            source_link: candidate.link.clone(),
            title: candidate.title.clone(),
            artist,
            summary: payload.summary,
            keywords,
            vibe: payload.vibe,
            category: candidate.category,
            source: candidate.source.clone(),
            image_url: candidate.image_url.clone(),
            discovered_at: candidate.discovered_at,
            analyzed_at: now,
            published_at,
            origin,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalyzeReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Failed rows that hit the attempt limit in this pass.
    pub parked: usize,
    /// Enriched rows whose link already backs an article; nothing was inserted.
    pub duplicates: usize,
    /// Unpublished entries carrying a fresh rank after the pass.
    pub ranked: usize,
}

/// Analyze phase: take the oldest pending batch, extract each item in turn, then
/// recompute ranks over everything unpublished. Item failures are counted, never fatal;
/// store failures abort the phase.
pub async fn run_analyze(
    store: &dyn Store,
    worker: &ExtractionWorker,
    cfg: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<AnalyzeReport> {
    ensure_metrics_described();
    let batch = store.next_batch(cfg.analyze.batch_size).await?;
    let mut report = AnalyzeReport::default();

    for row in &batch {
        let c = &row.candidate;
        match worker.ingest_one(c, &IngestMode::Scheduled, now).await {
            Ok(article) => {
                let score = rank::desirability_score(&article, &cfg.ranking);
                if !store.commit_enriched(&RankedEntry::new(article, score), now).await? {
                    counter!("analyze_items_total", "outcome" => "duplicate").increment(1);
                    debug!(target: "analyze", link = %c.link, "link already has an article, skipped");
                    report.duplicates += 1;
                    continue;
                }
                counter!("analyze_items_total", "outcome" => "ok").increment(1);
                debug!(target: "analyze", link = %c.link, score, "candidate enriched");
                report.succeeded += 1;
            }
            Err(e) if e.is_recoverable() => {
                let status = store
                    .record_failure(&c.link, cfg.analyze.max_attempts, now)
                    .await?;
                counter!("analyze_items_total", "outcome" => "failed").increment(1);
                if status == StageStatus::Failed {
                    counter!("analyze_parked_total").increment(1);
                    report.parked += 1;
                }
                warn!(target: "analyze", link = %c.link, error = %e, attempts = row.attempts + 1, "extraction failed, skipping item");
                report.failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    report.ranked = rank::rerank_pending(store).await?;
    info!(
        target: "analyze",
        batch = batch.len(),
        succeeded = report.succeeded,
        failed = report.failed,
        parked = report.parked,
        duplicates = report.duplicates,
        ranked = report.ranked,
        llm = worker.llm_name(),
        "analyze pass done"
    );
    Ok(report)
}
