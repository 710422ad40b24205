//! Collection runs driven end to end over on-disk outputs

use async_trait::async_trait;
use poly_signals::collector::{
    CollectError, Cursor, DumpSet, MarketCollector, Page, PolymarketRecord, PolymarketScope,
    RedditBackend, RedditCollector, SourceCollector, SourceKind, TwitterBackend, TwitterCollector,
};
use poly_signals::data::{read_jsonl, read_social_csv, OutputLayout};
use poly_signals::market::{normalize_market, Market};
use poly_signals::orchestrator::{
    stop_channel, ManifestStore, Orchestrator, PairStatus, RunOptions, RunStatus, StopHandle,
    StopSignal,
};
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Market listing served from fixed pages
struct ScriptedMarkets {
    pages: Vec<Vec<Value>>,
    /// Page index that fails once with a non-retryable error
    fail_at: Option<usize>,
    failed: AtomicBool,
    fingerprint: String,
    requested: Arc<Mutex<Vec<Cursor>>>,
    /// Requests a stop while serving this page
    stop_at: Option<(usize, StopHandle)>,
}

impl ScriptedMarkets {
    fn new(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages,
            fail_at: None,
            failed: AtomicBool::new(false),
            fingerprint: "scripted-markets".to_string(),
            requested: Arc::new(Mutex::new(Vec::new())),
            stop_at: None,
        }
    }

    fn stopping_at(mut self, page: usize, handle: StopHandle) -> Self {
        self.stop_at = Some((page, handle));
        self
    }

    fn failing_at(mut self, page: usize) -> Self {
        self.fail_at = Some(page);
        self
    }

    fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = fingerprint.to_string();
        self
    }

    /// Cursors requested so far, shared with the test
    fn request_log(&self) -> Arc<Mutex<Vec<Cursor>>> {
        Arc::clone(&self.requested)
    }
}

#[async_trait]
impl SourceCollector for ScriptedMarkets {
    type Scope = PolymarketScope;
    type Record = PolymarketRecord;

    fn source(&self) -> SourceKind {
        SourceKind::Polymarket
    }

    async fn discover(&self) -> Result<Vec<PolymarketScope>, CollectError> {
        Ok(vec![PolymarketScope::Markets])
    }

    async fn fetch_page(&self, _scope: &PolymarketScope, cursor: &Cursor) -> Result<Page, CollectError> {
        self.requested.lock().unwrap().push(cursor.clone());
        let idx = match cursor {
            Cursor::Start => 0,
            Cursor::Offset { offset } => *offset as usize,
            other => panic!("unexpected cursor {other:?}"),
        };
        if self.fail_at == Some(idx) && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(CollectError::Source("listing unavailable".to_string()));
        }
        if let Some((page, handle)) = &self.stop_at {
            if *page == idx {
                handle.stop();
            }
        }
        let next = (idx + 1 < self.pages.len()).then(|| Cursor::Offset {
            offset: idx as u64 + 1,
        });
        Ok(Page::new(self.pages[idx].clone(), next))
    }

    fn normalize(&self, _scope: &PolymarketScope, raw: &Value) -> Result<PolymarketRecord, CollectError> {
        normalize_market(raw).map(PolymarketRecord::Market)
    }

    fn fingerprint(&self, _scope: &PolymarketScope) -> String {
        self.fingerprint.clone()
    }
}

impl MarketCollector for ScriptedMarkets {
    fn history_scope(&self, _market: &Market) -> Option<PolymarketScope> {
        None
    }
}

fn market(id: &str, title: &str) -> Value {
    json!({
        "condition_id": id,
        "question": title,
        "description": "",
        "created_at": "2024-01-01T00:00:00Z",
        "end_date_iso": "2024-01-31T00:00:00Z",
        "closed": true,
        "tokens": [{"token_id": format!("{id}-yes"), "outcome": "Yes"}],
    })
}

type Run = Orchestrator<ScriptedMarkets>;

fn orchestrator(dir: &Path, markets: ScriptedMarkets, options: RunOptions, stop: StopSignal) -> Run {
    Orchestrator::new(OutputLayout::new(dir), markets, options, stop).unwrap()
}

fn market_ids(dir: &Path) -> Vec<String> {
    let markets: Vec<Market> = read_jsonl(&OutputLayout::new(dir).markets()).unwrap();
    markets.into_iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn test_overlapping_pages_dedup_by_id() {
    let dir = TempDir::new().unwrap();
    let pages = vec![
        vec![market("m1", "First"), market("m2", "Second")],
        vec![market("m2", "Second (updated)"), market("m3", "Third")],
    ];
    let run = orchestrator(
        dir.path(),
        ScriptedMarkets::new(pages),
        RunOptions::default(),
        StopSignal::never(),
    );

    let summary = run.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.status.exit_code(), 0);

    let markets: Vec<Market> = read_jsonl(&run.layout().markets()).unwrap();
    let ids: Vec<&str> = markets.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(markets[1].title, "Second (updated)");

    // Staging is cleared once outputs are written
    assert!(!run.layout().staging("polymarket").exists());
    assert!(run.layout().query_sets().exists());
    assert!(run.layout().windows().exists());
}

#[tokio::test]
async fn test_max_markets_caps_discovery() {
    let dir = TempDir::new().unwrap();
    let pages = vec![
        vec![market("m1", "First"), market("m2", "Second")],
        vec![market("m3", "Third")],
    ];
    let markets = ScriptedMarkets::new(pages);
    let options = RunOptions {
        max_markets: Some(2),
        ..RunOptions::default()
    };
    let run = orchestrator(dir.path(), markets, options, StopSignal::never());
    run.run().await.unwrap();

    assert_eq!(market_ids(dir.path()), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_max_markets_counts_distinct_markets() {
    let dir = TempDir::new().unwrap();
    let pages = vec![
        vec![market("m1", "First"), market("m2", "Second")],
        vec![market("m1", "First"), market("m2", "Second")],
        vec![market("m3", "Third")],
        vec![market("m4", "Fourth")],
    ];
    let markets = ScriptedMarkets::new(pages);
    let requested = markets.request_log();
    let options = RunOptions {
        max_markets: Some(3),
        ..RunOptions::default()
    };
    let run = orchestrator(dir.path(), markets, options, StopSignal::never());
    let summary = run.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(market_ids(dir.path()), vec!["m1", "m2", "m3"]);
    // The repeated page does not count toward the cap, the fourth page is never needed
    assert_eq!(requested.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_resume_after_failure_skips_committed_pages() {
    let dir = TempDir::new().unwrap();
    let pages = vec![
        vec![market("m1", "First"), market("m2", "Second")],
        vec![market("m3", "Third")],
    ];

    let first = orchestrator(
        dir.path(),
        ScriptedMarkets::new(pages.clone()).failing_at(1),
        RunOptions::default(),
        StopSignal::never(),
    );
    let summary = first.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.status.exit_code(), 1);

    let manifest = first.manifest().snapshot().await;
    let pair = manifest.pair("polymarket").unwrap();
    assert_eq!(pair.status, PairStatus::Partial);
    assert_eq!(pair.records, 2);
    assert!(pair.checkpoint.is_some());
    assert_eq!(market_ids(dir.path()), vec!["m1", "m2"]);
    drop(first);

    let markets = ScriptedMarkets::new(pages);
    let second = orchestrator(dir.path(), markets, RunOptions::default(), StopSignal::never());
    let summary = second.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(market_ids(dir.path()), vec!["m1", "m2", "m3"]);

    let manifest = ManifestStore::read(&second.layout().manifest())
        .unwrap()
        .unwrap();
    let pair = manifest.pair("polymarket").unwrap();
    assert_eq!(pair.status, PairStatus::Succeeded);
    assert_eq!(pair.records, 3);
    assert_eq!(pair.attempts, 2);
    assert!(pair.checkpoint.is_none());
}

#[tokio::test]
async fn test_resume_requests_only_remaining_pages() {
    let dir = TempDir::new().unwrap();
    let pages = vec![
        vec![market("m1", "First")],
        vec![market("m2", "Second")],
        vec![market("m3", "Third")],
    ];

    let first = orchestrator(
        dir.path(),
        ScriptedMarkets::new(pages.clone()).failing_at(2),
        RunOptions::default(),
        StopSignal::never(),
    );
    first.run().await.unwrap();
    drop(first);

    let layout = OutputLayout::new(dir.path());
    let resumed = ScriptedMarkets::new(pages);
    let requested = resumed.request_log();
    let run: Run = Orchestrator::new(layout, resumed, RunOptions::default(), StopSignal::never())
        .unwrap();
    run.run().await.unwrap();

    // Pages 0 and 1 were committed; only page 2 is fetched again
    assert_eq!(*requested.lock().unwrap(), vec![Cursor::Offset { offset: 2 }]);
    let markets: Vec<Market> = read_jsonl(&run.layout().markets()).unwrap();
    assert_eq!(markets.len(), 3);
    let manifest = run.manifest().snapshot().await;
    assert_eq!(manifest.pair("polymarket").unwrap().records, 3);
}

#[tokio::test]
async fn test_fingerprint_mismatch_needs_reset() {
    let dir = TempDir::new().unwrap();
    let pages = vec![vec![market("m1", "First")], vec![market("m2", "Second")]];

    let first = orchestrator(
        dir.path(),
        ScriptedMarkets::new(pages.clone()).failing_at(1),
        RunOptions::default(),
        StopSignal::never(),
    );
    first.run().await.unwrap();
    drop(first);

    let changed = ScriptedMarkets::new(pages.clone()).with_fingerprint("other-listing");
    let second = orchestrator(dir.path(), changed, RunOptions::default(), StopSignal::never());
    let summary = second.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Failed);
    let reason = summary.rows[0].reason.clone().unwrap();
    assert!(reason.contains("--reset-mismatched"), "{reason}");
    drop(second);

    let options = RunOptions {
        reset_mismatched: true,
        ..RunOptions::default()
    };
    let changed = ScriptedMarkets::new(pages).with_fingerprint("other-listing");
    let third = orchestrator(dir.path(), changed, options, StopSignal::never());
    let summary = third.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(market_ids(dir.path()), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_stop_before_run_is_interrupted() {
    let dir = TempDir::new().unwrap();
    let (handle, signal) = stop_channel();
    handle.stop();

    let markets = ScriptedMarkets::new(vec![vec![market("m1", "First")]]);
    let run = orchestrator(dir.path(), markets, RunOptions::default(), signal);
    let summary = run.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.status.exit_code(), 130);
    assert!(!run.layout().markets().exists());
}

#[tokio::test]
async fn test_interrupted_then_resumed_matches_uninterrupted() {
    let pages = vec![
        vec![market("m1", "First"), market("m2", "Second")],
        vec![market("m2", "Second (updated)"), market("m3", "Third")],
        vec![market("m4", "Fourth")],
    ];

    let baseline = TempDir::new().unwrap();
    let run = orchestrator(
        baseline.path(),
        ScriptedMarkets::new(pages.clone()),
        RunOptions::default(),
        StopSignal::never(),
    );
    run.run().await.unwrap();
    drop(run);

    let dir = TempDir::new().unwrap();
    let (handle, signal) = stop_channel();
    let interrupted = orchestrator(
        dir.path(),
        ScriptedMarkets::new(pages.clone()).stopping_at(1, handle),
        RunOptions::default(),
        signal,
    );
    let summary = interrupted.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Interrupted);
    // The in-flight page was committed before stopping
    let manifest = interrupted.manifest().snapshot().await;
    assert_eq!(manifest.pair("polymarket").unwrap().records, 4);
    drop(interrupted);

    let resumed = ScriptedMarkets::new(pages);
    let requested = resumed.request_log();
    let run = orchestrator(dir.path(), resumed, RunOptions::default(), StopSignal::never());
    let summary = run.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(*requested.lock().unwrap(), vec![Cursor::Offset { offset: 2 }]);

    let expected: Vec<Market> = read_jsonl(&OutputLayout::new(baseline.path()).markets()).unwrap();
    let actual: Vec<Market> = read_jsonl(&run.layout().markets()).unwrap();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_fresh_run_ignores_previous_manifest() {
    let dir = TempDir::new().unwrap();
    let pages = vec![vec![market("m1", "First")], vec![market("m2", "Second")]];

    let first = orchestrator(
        dir.path(),
        ScriptedMarkets::new(pages.clone()).failing_at(1),
        RunOptions::default(),
        StopSignal::never(),
    );
    first.run().await.unwrap();
    let first_id = first.manifest().snapshot().await.run_id;
    drop(first);

    let markets = ScriptedMarkets::new(pages);
    let options = RunOptions {
        fresh: true,
        ..RunOptions::default()
    };
    let second = orchestrator(dir.path(), markets, options, StopSignal::never());
    second.run().await.unwrap();

    let manifest = second.manifest().snapshot().await;
    assert_ne!(manifest.run_id, first_id);
    assert_eq!(manifest.pair("polymarket").unwrap().attempts, 1);
}

fn write_dump(dir: &Path, lines: &[Value]) -> std::path::PathBuf {
    let path = dir.join("RS_2024-01.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    writeln!(file, "{{not json").unwrap();
    path
}

#[tokio::test]
async fn test_reddit_dump_keeps_in_window_matches() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        &[
            json!({"id": "p1", "title": "Bitcoin to the moon", "author": "alice",
                   "subreddit": "CryptoCurrency", "created_utc": 1_704_844_800, "score": 42}),
            json!({"id": "p2", "title": "Bitcoin again", "author": "bob",
                   "subreddit": "CryptoCurrency", "created_utc": 1_709_251_200}),
            json!({"id": "p3", "title": "Nothing relevant about cats", "author": "carol",
                   "subreddit": "aww", "created_utc": 1_705_017_600}),
            json!({"title": "Bitcoin post without an id", "created_utc": 1_704_844_800}),
        ],
    );

    let out = dir.path().join("out");
    let markets = ScriptedMarkets::new(vec![vec![market("0xbtc", "Will Bitcoin hit $100k in January?")]]);
    let reddit = RedditCollector::new(RedditBackend::Dump(DumpSet::open(&dump).unwrap()), &[], 100);
    let run: Orchestrator<ScriptedMarkets, RedditCollector> =
        Orchestrator::new(OutputLayout::new(&out), markets, RunOptions::default(), StopSignal::never())
            .unwrap()
            .with_reddit(reddit, 2);

    let summary = run.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);

    let csv = run.layout().social_csv(SourceKind::Reddit, "0xbtc");
    let posts = read_social_csv(&csv).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].post_id, "t3_p1");
    assert_eq!(posts[0].market_id, "0xbtc");
    assert_eq!(posts[0].channel.as_deref(), Some("CryptoCurrency"));
    assert_eq!(posts[0].engagement.get("score"), Some(&42));

    let manifest = run.manifest().snapshot().await;
    let pair = manifest.pair("reddit:0xbtc").unwrap();
    assert_eq!(pair.status, PairStatus::Succeeded);
    assert_eq!(pair.records, 1);
    assert!(pair.malformed >= 1);
    assert!(!run.layout().staging("reddit:0xbtc").exists());
}

#[tokio::test]
async fn test_reddit_rerun_skips_succeeded_pairs() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        &[json!({"id": "p1", "title": "Bitcoin breakout", "author": "alice",
                 "created_utc": 1_704_844_800})],
    );
    let out = dir.path().join("out");

    for attempt in 1..=2u32 {
        let markets = ScriptedMarkets::new(vec![vec![market("0xbtc", "Will Bitcoin hit $100k?")]]);
        let reddit =
            RedditCollector::new(RedditBackend::Dump(DumpSet::open(&dump).unwrap()), &[], 100);
        let run: Orchestrator<ScriptedMarkets, RedditCollector> = Orchestrator::new(
            OutputLayout::new(&out),
            markets,
            RunOptions::default(),
            StopSignal::never(),
        )
        .unwrap()
        .with_reddit(reddit, 1);

        let summary = run.run().await.unwrap();
        assert_eq!(summary.status, RunStatus::Succeeded);

        let manifest = run.manifest().snapshot().await;
        // Succeeded pairs are not collected again
        assert_eq!(manifest.pair("reddit:0xbtc").unwrap().attempts, 1, "run {attempt}");
        assert_eq!(manifest.pair("polymarket").unwrap().attempts, 1, "run {attempt}");
    }

    let posts = read_social_csv(&OutputLayout::new(&out).social_csv(SourceKind::Reddit, "0xbtc"))
        .unwrap();
    assert_eq!(posts.len(), 1);
}

#[tokio::test]
async fn test_reddit_hashtag_only_match() {
    let dir = TempDir::new().unwrap();
    let dump = write_dump(
        dir.path(),
        &[
            json!({"id": "p1", "title": "Big day for the #FederalReserve", "author": "alice",
                   "created_utc": 1_704_844_800}),
            json!({"id": "p2", "title": "Big day for the federal budget", "author": "bob",
                   "created_utc": 1_704_844_800}),
        ],
    );

    let out = dir.path().join("out");
    let markets = ScriptedMarkets::new(vec![vec![market(
        "0xfed",
        "Will the Federal Reserve cut rates in March?",
    )]]);
    let reddit = RedditCollector::new(RedditBackend::Dump(DumpSet::open(&dump).unwrap()), &[], 100);
    let run: Orchestrator<ScriptedMarkets, RedditCollector> =
        Orchestrator::new(OutputLayout::new(&out), markets, RunOptions::default(), StopSignal::never())
            .unwrap()
            .with_reddit(reddit, 1);

    let summary = run.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);

    let posts = read_social_csv(&run.layout().social_csv(SourceKind::Reddit, "0xfed")).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].post_id, "t3_p1");
    assert_eq!(posts[0].hashtags, vec!["federalreserve"]);
}

#[tokio::test]
async fn test_twitter_dataset_keeps_in_window_matches() {
    let dir = TempDir::new().unwrap();
    let tweets = json!([
        {"id": "t1", "text": "Bitcoin ETF inflows keep coming", "username": "alice",
         "created_at": "2024-01-10T12:00:00Z", "likes": 5},
        {"id": "t2", "text": "Look at this cat", "username": "bob",
         "created_at": "2024-01-11T12:00:00Z"},
        {"id": "t3", "text": "Bitcoin breaking out", "username": "carol",
         "created_at": "2024-02-20T12:00:00Z"},
        {"id": "t1", "text": "Bitcoin ETF inflows keep coming", "username": "alice",
         "created_at": "2024-01-10T12:00:00Z", "likes": 5},
        {"id": "t4", "username": "dave", "created_at": "2024-01-12T12:00:00Z"},
    ]);
    let dataset = dir.path().join("tweets.json");
    std::fs::write(&dataset, tweets.to_string()).unwrap();

    let out = dir.path().join("out");
    let markets = ScriptedMarkets::new(vec![vec![market("0xbtc", "Will Bitcoin hit $100k in January?")]]);
    let twitter = TwitterCollector::new(TwitterBackend::Dataset(DumpSet::open(&dataset).unwrap()), 2);
    let run: Orchestrator<ScriptedMarkets, RedditCollector, TwitterCollector> =
        Orchestrator::new(OutputLayout::new(&out), markets, RunOptions::default(), StopSignal::never())
            .unwrap()
            .with_twitter(twitter, 1);

    let summary = run.run().await.unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded);

    let posts = read_social_csv(&run.layout().social_csv(SourceKind::Twitter, "0xbtc")).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].post_id, "t1");
    assert_eq!(posts[0].author, "alice");
    assert_eq!(posts[0].engagement.get("like_count"), Some(&5));

    let manifest = run.manifest().snapshot().await;
    let pair = manifest.pair("twitter:0xbtc").unwrap();
    assert_eq!(pair.status, PairStatus::Succeeded);
    assert!(pair.malformed >= 1);
    assert!(manifest.pair("reddit:0xbtc").is_none());
}
