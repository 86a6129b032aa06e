// src/pipeline.rs
//! Pipeline entry point. All collaborators (store, providers, LLM, clock) are built
//! once at startup and injected here; one `run_tick` call runs at most one phase.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyze::on_demand::{self, SearchOutcome};
use crate::analyze::{run_analyze, AnalyzeReport, ExtractionWorker, LlmClient};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ingest::types::{SearchProvider, SearchRequest};
use crate::ingest::{run_scrape, ProviderFailure};
use crate::model::{Category, Origin, RankedEntry, VoteColumn};
use crate::publish::{run_publish, PublishReport};
use crate::rank;
use crate::schedule::{last_closed_window, plan_tick, Decision, Ledger, Phase, SkipReason};
use crate::store::Store;
use crate::vibe::{self, VibeSummary};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays.
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeReport {
    pub category: Option<Category>,
    pub requests: usize,
    pub candidates: usize,
    pub duplicates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failures: Vec<ProviderFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PhaseReport {
    Scrape(ScrapeReport),
    Analyze(AnalyzeReport),
    Publish(PublishReport),
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    Completed {
        phase: Phase,
        catch_up: bool,
        report: PhaseReport,
    },
    Standby(SkipReason),
    /// Another tick holds the phase lock.
    Busy,
}

impl TickOutcome {
    /// Wire label of a completed phase.
    pub fn step_label(phase: Phase) -> &'static str {
        match phase {
            Phase::Scrape => "Scraping Completed",
            Phase::Analyze => "AI Analysis Done",
            Phase::Publish => "Release Done",
            Phase::Standby => "Standby",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TickOutcome::Completed { phase, report, .. } => serde_json::json!({
                "step": Self::step_label(*phase),
                "report": report,
            }),
            TickOutcome::Standby(reason) => serde_json::json!({
                "status": "Standby",
                "reason": reason.as_str(),
            }),
            TickOutcome::Busy => serde_json::json!({ "status": "Busy" }),
        }
    }
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_ticks_total", "Ticks by outcome.");
        describe_counter!("schedule_missed_windows_total", "Phase windows that passed without a run.");
        describe_counter!("staged_rows_total", "Staged rows inserted or refreshed by scrapes.");
        describe_counter!("votes_total", "Vote increments by column.");
        describe_histogram!("pipeline_phase_ms", "Phase duration in milliseconds.");
        describe_gauge!("pipeline_last_tick_ts", "Unix time of the last tick that ran a phase.");
    });
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn Store>,
    providers: Vec<Arc<dyn SearchProvider>>,
    on_demand_provider: Option<Arc<dyn SearchProvider>>,
    worker: ExtractionWorker,
    clock: Arc<dyn Clock>,
    phase_lock: tokio::sync::Mutex<()>,
    /// Window start last reported as missed, per phase.
    reported_missed: Mutex<HashMap<Phase, DateTime<Utc>>>,
}

impl Pipeline {
    /// The first provider also serves on-demand searches unless overridden.
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn Store>,
        providers: Vec<Arc<dyn SearchProvider>>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        ensure_metrics_described();
        let worker = ExtractionWorker::new(llm, config.llm.clone());
        let on_demand_provider = providers.first().cloned();
        Self {
            config,
            store,
            providers,
            on_demand_provider,
            worker,
            clock: Arc::new(SystemClock),
            phase_lock: tokio::sync::Mutex::new(()),
            reported_missed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_on_demand_provider(mut self, provider: Option<Arc<dyn SearchProvider>>) -> Self {
        self.on_demand_provider = provider;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn load_ledger(&self) -> Result<Ledger> {
        let mut ledger = Ledger::new();
        for p in Phase::ACTIVE {
            if let Some(at) = self.store.last_run(p).await? {
                ledger.insert(p, at);
            }
        }
        Ok(ledger)
    }

    fn report_missed(&self, missed: &[Phase], now: DateTime<Utc>) {
        let mut seen = self.reported_missed.lock();
        for p in missed {
            let Some((start, _)) = last_closed_window(*p, now) else {
                continue;
            };
            if seen.get(p) == Some(&start) {
                continue;
            }
            seen.insert(*p, start);
            counter!("schedule_missed_windows_total", "phase" => p.as_str()).increment(1);
            warn!(target: "schedule", phase = %p, window_start = %start, "phase window passed without a run");
        }
    }

    /// Evaluate the schedule at the current time and run the selected phase to completion.
    pub async fn run_tick(&self) -> Result<TickOutcome> {
        let Ok(_guard) = self.phase_lock.try_lock() else {
            counter!("pipeline_ticks_total", "outcome" => "busy").increment(1);
            info!(target: "schedule", "phase already running, tick skipped");
            return Ok(TickOutcome::Busy);
        };

        let now = self.clock.now();
        let ledger = self.load_ledger().await?;
        let plan = plan_tick(now, &ledger, self.config.schedule.catch_up_missed);
        self.report_missed(&plan.missed, now);

        let (phase, catch_up) = match plan.decision {
            Decision::Standby(reason) => {
                counter!("pipeline_ticks_total", "outcome" => "standby").increment(1);
                tracing::debug!(target: "schedule", minute = now.minute(), reason = reason.as_str(), "standby");
                return Ok(TickOutcome::Standby(reason));
            }
            Decision::Run { phase, catch_up } => (phase, catch_up),
        };

        info!(target: "schedule", phase = %phase, catch_up, "phase start");
        let t0 = Instant::now();
        let report = match phase {
            Phase::Scrape => PhaseReport::Scrape(self.scrape(now).await?),
            Phase::Analyze => PhaseReport::Analyze(self.analyze(now).await?),
            Phase::Publish => PhaseReport::Publish(self.publish(now).await?),
            Phase::Standby => return Ok(TickOutcome::Standby(SkipReason::OutsideWindow)),
        };
        self.store.record_run(phase, now).await?;

        histogram!("pipeline_phase_ms", "phase" => phase.as_str())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("pipeline_last_tick_ts").set(now.timestamp() as f64);
        counter!("pipeline_ticks_total", "outcome" => phase.as_str()).increment(1);

        Ok(TickOutcome::Completed {
            phase,
            catch_up,
            report,
        })
    }

    /// Scrape phase: jitter, then this hour's category queries against every provider.
    pub async fn scrape(&self, now: DateTime<Utc>) -> Result<ScrapeReport> {
        let max = self.config.schedule.jitter_max_secs;
        if max > 0 {
            let secs = rand::rng().random_range(0..=max);
            info!(target: "ingest", delay_secs = secs, "scrape jitter");
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }

        let cfg = &self.config.providers;
        let category = self.config.category_for_hour(now.hour());
        let requests: Vec<SearchRequest> = self
            .config
            .queries_for(category)
            .map(|q| SearchRequest {
                query: q.to_string(),
                category,
                count: cfg.result_count,
                date_window: Some(cfg.date_window.clone()),
                discovered_at: now,
            })
            .collect();

        let outcome = run_scrape(
            &self.providers,
            &requests,
            Duration::from_secs(cfg.timeout_secs),
        )
        .await;
        let upsert = self.store.upsert_candidates(&outcome.candidates, now).await?;
        counter!("staged_rows_total").increment((upsert.inserted + upsert.updated) as u64);

        info!(
            target: "ingest",
            category = %category,
            candidates = outcome.candidates.len(),
            inserted = upsert.inserted,
            updated = upsert.updated,
            failed_providers = outcome.failures.len(),
            "scraping completed"
        );
        Ok(ScrapeReport {
            category: Some(category),
            requests: requests.len(),
            candidates: outcome.candidates.len(),
            duplicates: outcome.duplicates,
            inserted: upsert.inserted,
            updated: upsert.updated,
            failures: outcome.failures,
        })
    }

    pub async fn analyze(&self, now: DateTime<Utc>) -> Result<AnalyzeReport> {
        run_analyze(self.store.as_ref(), &self.worker, &self.config, now).await
    }

    pub async fn publish(&self, now: DateTime<Utc>) -> Result<PublishReport> {
        run_publish(self.store.as_ref(), &self.config.retention, now).await
    }

    pub async fn search(&self, keyword: &str) -> Result<SearchOutcome> {
        on_demand::search_or_create(
            self.store.as_ref(),
            self.on_demand_provider.as_deref(),
            &self.worker,
            &self.config.providers,
            keyword,
            self.clock.now(),
        )
        .await
    }

    pub async fn vote(&self, id: Uuid, column: VoteColumn) -> Result<u64> {
        let n = self.store.increment_vote(id, column).await?;
        counter!("votes_total", "column" => column.as_str()).increment(1);
        Ok(n)
    }

    /// Published entries for one category, or the cross-category view for `None`.
    /// Only scheduled articles appear; on-demand rows carry no rank and are reached
    /// through search.
    pub async fn feed(&self, category: Option<Category>) -> Result<Vec<RankedEntry>> {
        let mut rows = self.store.published(category).await?;
        rows.retain(|e| e.article.origin == Origin::Scheduled);
        match category {
            Some(_) => rank::sort_category_view(&mut rows),
            None => rank::sort_all_view(&mut rows),
        }
        Ok(rows)
    }

    pub async fn vibe(&self) -> Result<VibeSummary> {
        let mut published = self.store.published(None).await?;
        published.retain(|e| e.article.origin == Origin::Scheduled);
        Ok(vibe::aggregate(self.config.vibe_policy, &published))
    }
}

/// Drive ticks from an in-process interval. Failures are logged; the loop keeps going.
pub fn spawn_ticker(pipeline: Arc<Pipeline>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match pipeline.run_tick().await {
                Ok(outcome) => {
                    tracing::debug!(target: "schedule", outcome = %outcome.to_json(), "internal tick")
                }
                Err(e) => warn!(target: "schedule", error = %e, "internal tick failed"),
            }
        }
    })
}
