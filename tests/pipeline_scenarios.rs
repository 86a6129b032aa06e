// tests/pipeline_scenarios.rs
//
// End-to-end phase scenarios against the in-memory store and scripted collaborators.

mod common;

use std::sync::Arc;

use chrono::Duration;
use kpulse_pipeline::analyze::ScriptedLlm;
use kpulse_pipeline::ingest::types::SearchProvider;
use kpulse_pipeline::model::{Category, RawCandidate, VoteColumn};
use kpulse_pipeline::pipeline::{PhaseReport, TickOutcome};
use kpulse_pipeline::schedule::Phase;
use kpulse_pipeline::store::Store;

use common::{at, good_json, test_config, FakeProvider, Harness};

#[tokio::test]
async fn scrape_collapses_overlapping_links_into_nine_rows() {
    let a = FakeProvider::new("Google", &["https://n/1", "https://n/2", "https://n/3", "https://n/4", "https://n/5"]);
    let b = FakeProvider::new("Naver", &["https://n/5", "https://n/6", "https://n/7", "https://n/8", "https://n/9"]);
    let providers: Vec<Arc<dyn SearchProvider>> = vec![a.clone(), b.clone()];
    let h = Harness::new(test_config(), providers, ScriptedLlm::new(Vec::<Option<String>>::new()), at(9, 3));

    let outcome = h.pipeline.run_tick().await.unwrap();
    let TickOutcome::Completed { phase, report: PhaseReport::Scrape(report), .. } = outcome else {
        panic!("expected a scrape");
    };
    assert_eq!(phase, Phase::Scrape);
    assert_eq!(report.inserted, 9);
    assert_eq!(report.duplicates, 1);
    assert!(report.failures.is_empty());

    let staged = h.store.staged_candidates().await.unwrap();
    assert_eq!(staged.len(), 9);
    assert!(staged.iter().all(|s| s.candidate.category == Category::KPop));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(a.requests()[0].date_window.as_deref(), Some("d1"));
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn scrape_survives_one_failing_provider() {
    let ok = FakeProvider::new("Google", &["https://n/1", "https://n/2"]);
    let down = FakeProvider::failing("Naver");
    let providers: Vec<Arc<dyn SearchProvider>> = vec![ok, down];
    let h = Harness::new(test_config(), providers, ScriptedLlm::new(Vec::<Option<String>>::new()), at(9, 3));

    let outcome = h.pipeline.run_tick().await.unwrap();
    let TickOutcome::Completed { report: PhaseReport::Scrape(report), .. } = outcome else {
        panic!("expected a scrape");
    };
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].provider, "Naver");
}

#[tokio::test]
async fn one_bad_completion_does_not_abort_the_batch() {
    let mut replies: Vec<Option<String>> = (1..=10).map(|i| Some(good_json(&format!("Artist{i}"), 10 * i))).collect();
    replies[3] = Some("I'm sorry, here is your answer: {artist: ".to_string());
    let h = Harness::new(test_config(), Vec::new(), ScriptedLlm::new(replies), at(9, 21));

    let base = at(8, 0);
    let candidates: Vec<RawCandidate> = (0..10)
        .map(|i| RawCandidate {
            link: format!("https://n/{i}"),
            title: format!("headline {i}"),
            snippet: String::new(),
            source: "test".into(),
            image_url: None,
            discovered_at: base + Duration::minutes(i),
            category: Category::KPop,
        })
        .collect();
    h.store.upsert_candidates(&candidates, base).await.unwrap();

    let outcome = h.pipeline.run_tick().await.unwrap();
    assert_eq!(outcome.to_json()["step"], "AI Analysis Done");
    let TickOutcome::Completed { report: PhaseReport::Analyze(report), .. } = outcome else {
        panic!("expected analyze");
    };
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed, 1);
    assert_eq!(h.llm.calls(), 10);

    let pending = h.store.pending_entries(None).await.unwrap();
    assert_eq!(pending.len(), 9);
    assert!(pending.iter().all(|e| !e.article.is_published()));
    assert!(pending.iter().all(|e| e.article.source_link != "https://n/3"));

    let mut ranks: Vec<u32> = pending.iter().map(|e| e.rank.unwrap()).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, (1..=9).collect::<Vec<_>>());

    // the failed row stays pending for the next cycle
    let retry = h.store.next_batch(10).await.unwrap();
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].attempts, 1);
}

#[tokio::test]
async fn interrupted_publish_shows_all_or_nothing() {
    let llm = ScriptedLlm::always(good_json("IVE", 80));
    let h = Harness::new(test_config(), Vec::new(), llm, at(9, 21));
    let candidates: Vec<RawCandidate> = (0..4)
        .map(|i| RawCandidate {
            link: format!("https://n/{i}"),
            title: format!("headline {i}"),
            snippet: String::new(),
            source: "test".into(),
            image_url: None,
            discovered_at: at(8, i),
            category: Category::KPop,
        })
        .collect();
    h.store.upsert_candidates(&candidates, at(8, 30)).await.unwrap();
    h.pipeline.run_tick().await.unwrap();

    h.clock.set(at(10, 0));
    h.store.fail_next_publish_at(2);
    assert!(h.pipeline.run_tick().await.is_err());
    assert_eq!(h.store.published(None).await.unwrap().len(), 0);

    // the failed window was not recorded, so a repeat trigger retries the whole set
    h.clock.advance(Duration::seconds(20));
    let outcome = h.pipeline.run_tick().await.unwrap();
    assert_eq!(outcome.to_json()["step"], "Release Done");
    let published = h.store.published(None).await.unwrap();
    assert_eq!(published.len(), 4);
    let stamp = published[0].article.published_at;
    assert!(published.iter().all(|e| e.article.published_at == stamp));

    // duplicate trigger in the same minute is a no-op
    let again = h.pipeline.run_tick().await.unwrap();
    assert_eq!(again.to_json()["reason"], "already_ran");
}

#[tokio::test]
async fn full_hour_feeds_the_category_view() {
    let a = FakeProvider::new("Google", &["https://n/1", "https://n/2", "https://n/3"]);
    let providers: Vec<Arc<dyn SearchProvider>> = vec![a];
    let llm = ScriptedLlm::new([
        Some(good_json("NewJeans", 90)),
        Some(good_json("IVE", 40)),
        Some(good_json("aespa", 70)),
    ]);
    let h = Harness::new(test_config(), providers, llm, at(9, 2));

    assert_eq!(h.pipeline.run_tick().await.unwrap().to_json()["step"], "Scraping Completed");
    h.clock.set(at(9, 15));
    assert_eq!(h.pipeline.run_tick().await.unwrap().to_json()["status"], "Standby");
    h.clock.set(at(9, 20));
    assert_eq!(h.pipeline.run_tick().await.unwrap().to_json()["step"], "AI Analysis Done");
    h.clock.set(at(10, 0));
    assert_eq!(h.pipeline.run_tick().await.unwrap().to_json()["step"], "Release Done");

    let feed = h.pipeline.feed(Some(Category::KPop)).await.unwrap();
    let artists: Vec<&str> = feed.iter().map(|e| e.article.artist.as_str()).collect();
    assert_eq!(artists, vec!["NewJeans", "aespa", "IVE"]);
    assert_eq!(feed.iter().map(|e| e.rank.unwrap()).collect::<Vec<_>>(), vec![1, 2, 3]);

    let all = h.pipeline.feed(None).await.unwrap();
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn search_results_stay_out_of_the_ranked_feed() {
    let p = FakeProvider::new("Google", &["https://n/bts"]);
    let providers: Vec<Arc<dyn SearchProvider>> = vec![p.clone()];
    let llm = ScriptedLlm::new([Some(good_json("BTS", 50)), Some(good_json("Zico", 95))]);
    let h = Harness::new(test_config(), providers, llm, at(9, 3));

    h.pipeline.scrape(at(9, 3)).await.unwrap();
    h.pipeline.analyze(at(9, 21)).await.unwrap();
    h.pipeline.publish(at(10, 0)).await.unwrap();

    h.clock.set(at(10, 30));
    let created = h.pipeline.search("Zico").await.unwrap();
    assert_eq!(serde_json::to_value(&created).unwrap()["created_now"], true);

    let feed = h.pipeline.feed(Some(Category::KPop)).await.unwrap();
    let rows: Vec<(&str, Option<u32>)> = feed.iter().map(|e| (e.article.artist.as_str(), e.rank)).collect();
    assert_eq!(rows, vec![("BTS", Some(1))]);
    assert_eq!(h.pipeline.feed(None).await.unwrap().len(), 1);
    assert_eq!(h.pipeline.vibe().await.unwrap().sample_size, 1);

    // the row is still there for readers who search for it
    let again = serde_json::to_value(h.pipeline.search("zico").await.unwrap()).unwrap();
    assert_eq!(again["data"]["artist"], "Zico");
    assert_eq!(p.calls(), 2);
}

#[tokio::test]
async fn a_link_is_published_once_after_its_staging_row_ages() {
    let p = FakeProvider::new("Google", &["https://n/keep"]);
    let providers: Vec<Arc<dyn SearchProvider>> = vec![p];
    let h = Harness::new(test_config(), providers, ScriptedLlm::always(good_json("IVE", 60)), at(9, 3));

    h.pipeline.scrape(at(9, 3)).await.unwrap();
    assert_eq!(h.pipeline.analyze(at(9, 21)).await.unwrap().succeeded, 1);
    assert_eq!(h.pipeline.publish(at(10, 0)).await.unwrap().published, 1);

    // two days on, another batch publishes and prunes old staging rows
    let later = at(10, 0) + Duration::hours(49);
    h.store
        .upsert_candidates(
            &[RawCandidate {
                link: "https://n/other".into(),
                title: "other".into(),
                snippet: String::new(),
                source: "test".into(),
                image_url: None,
                discovered_at: later,
                category: Category::KPop,
            }],
            later,
        )
        .await
        .unwrap();
    h.pipeline.analyze(later).await.unwrap();
    assert_eq!(h.pipeline.publish(later + Duration::minutes(1)).await.unwrap().published, 1);
    let staged = h.store.staged_candidates().await.unwrap();
    assert!(staged.iter().any(|s| s.candidate.link == "https://n/keep"));

    // the same link comes back from the provider
    let scrape = h.pipeline.scrape(later + Duration::hours(1)).await.unwrap();
    assert_eq!((scrape.inserted, scrape.updated), (0, 1));
    let analyzed = h.pipeline.analyze(later + Duration::minutes(80)).await.unwrap();
    assert_eq!(analyzed.succeeded, 0);
    h.pipeline.publish(later + Duration::hours(2)).await.unwrap();

    let live = h.store.published(None).await.unwrap();
    assert_eq!(live.iter().filter(|e| e.article.source_link == "https://n/keep").count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_votes_are_never_lost() {
    let h = Harness::new(test_config(), Vec::new(), ScriptedLlm::always(good_json("BTS", 50)), at(9, 21));
    h.store
        .upsert_candidates(
            &[RawCandidate {
                link: "https://n/bts".into(),
                title: "BTS".into(),
                snippet: String::new(),
                source: "test".into(),
                image_url: None,
                discovered_at: at(9, 0),
                category: Category::KPop,
            }],
            at(9, 0),
        )
        .await
        .unwrap();
    h.pipeline.run_tick().await.unwrap();
    let entry = h.store.pending_entries(None).await.unwrap().remove(0);

    const M: u64 = 64;
    let id = entry.id;
    let tasks: Vec<_> = (0..M)
        .map(|_| {
            let p = h.pipeline.clone();
            tokio::spawn(async move { p.vote(id, VoteColumn::Likes).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let after = h.store.get(entry.id).await.unwrap().unwrap();
    assert_eq!(after.likes, M);
    assert_eq!(after.dislikes, 0);
    assert_eq!(after.rank, entry.rank);
    assert_eq!(after.score, entry.score);
}
