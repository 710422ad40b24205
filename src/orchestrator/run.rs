//! Collection run: DISCOVER -> BUILD_WINDOWS -> COLLECT_SOCIAL -> FINALIZE
//!
//! Every unit of work is a pair tracked in the manifest. Pairs commit each
//! page to a staging file, then advance their checkpoint; outputs are written
//! from staging when a pair completes. A pair marked succeeded whose staging
//! file still exists finished right before a crash, and its outputs are
//! rebuilt from staging on the next run.

use super::manifest::{pair_key, ManifestStore, PairStatus, RunStatus};
use super::stop::StopSignal;
use super::stream::{PageStream, Step};
use super::summary::RunSummary;
use crate::collector::{
    CollectError, Cursor, MarketCollector, PolymarketCollector, PolymarketRecord,
    PolymarketScope, RedditCollector, SocialCollector, SocialPost, SocialScope, SourceCollector,
    SourceKind, TwitterCollector,
};
use crate::data::{
    dedup_posts, read_jsonl, write_json, write_jsonl, write_social_csv, OutputLayout, StagingFile,
};
use crate::market::{dedup_by_id, Market, PriceHistoryRow, PricePoint, UserPosition};
use crate::query::QuerySetBuilder;
use crate::ratelimit::BackoffPolicy;
use crate::telemetry;
use crate::window::{WindowCalculator, WindowParams};
use futures_util::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Per-invocation run options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Ignore any existing manifest and staging files
    pub fresh: bool,
    /// Discard checkpoints that no longer match their source
    pub reset_mismatched: bool,
    pub max_markets: Option<usize>,
    pub max_retries: u32,
    /// Concurrent price-history pairs
    pub history_fan_out: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            fresh: false,
            reset_mismatched: false,
            max_markets: None,
            max_retries: 3,
            history_fan_out: 4,
        }
    }
}

/// How a pair ended in this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Completed(PairStatus),
    /// Stop requested; progress is checkpointed
    Stopped,
}

/// Stop a pair once it has committed `limit` distinct records
struct RecordCap<R> {
    limit: usize,
    /// Identity of a record; records without one do not count
    key: fn(&R) -> Option<String>,
}

fn market_key(record: &PolymarketRecord) -> Option<String> {
    match record {
        PolymarketRecord::Market(m) => Some(m.id.clone()),
        _ => None,
    }
}

/// A social collector and its market concurrency
struct SocialSource<C> {
    collector: Arc<C>,
    fan_out: usize,
}

/// Everything a pair needs, cloneable into spawned tasks
#[derive(Clone)]
struct PairContext {
    layout: OutputLayout,
    manifest: Arc<ManifestStore>,
    stop: StopSignal,
    max_retries: u32,
    retry_delays: HashMap<SourceKind, BackoffPolicy>,
    reset_mismatched: bool,
}

impl PairContext {
    fn retry_delay(&self, source: SourceKind) -> BackoffPolicy {
        self.retry_delays.get(&source).copied().unwrap_or_default()
    }

    fn staging(&self, source: SourceKind, market_id: Option<&str>) -> StagingFile {
        StagingFile::new(self.layout.staging(&pair_key(source, market_id)))
    }

    /// Cursor to start a pair from, `None` when its checkpoint cannot be used
    async fn resume_cursor<C: SourceCollector>(
        &self,
        collector: &C,
        scope: &C::Scope,
        market_id: Option<&str>,
    ) -> Result<Option<Cursor>, CollectError> {
        let source = collector.source();
        let key = pair_key(source, market_id);
        let Some(checkpoint) = self.manifest.pair(&key).await.and_then(|p| p.checkpoint) else {
            return Ok(Some(Cursor::Start));
        };

        match collector.validate_resume(scope, &checkpoint) {
            Ok(()) => {
                debug!(pair = %key, cursor = ?checkpoint.cursor, "Resuming from checkpoint");
                Ok(Some(checkpoint.cursor))
            }
            Err(e) if self.reset_mismatched => {
                warn!(pair = %key, error = %e, "Discarding mismatched checkpoint");
                self.manifest.reset_pair(&key).await?;
                self.staging(source, market_id).clear()?;
                Ok(Some(Cursor::Start))
            }
            Err(e) => {
                warn!(pair = %key, error = %e, "Checkpoint does not match source");
                self.manifest.start_pair(source, market_id).await?;
                let reason = format!("{e}; rerun with --reset-mismatched to collect from scratch");
                self.manifest
                    .finish_pair(&key, PairStatus::Failed, 0, Some(reason))
                    .await?;
                telemetry::record_pair(source, PairStatus::Failed.as_str(), Default::default());
                Ok(None)
            }
        }
    }

    /// Drive one pair until it is exhausted, fails, stops or reaches `cap`
    async fn drive<C>(
        &self,
        collector: &C,
        scope: &C::Scope,
        market_id: Option<&str>,
        cap: Option<RecordCap<C::Record>>,
    ) -> Result<PairOutcome, CollectError>
    where
        C: SourceCollector,
        C::Record: Serialize + DeserializeOwned,
    {
        let source = collector.source();
        let key = pair_key(source, market_id);
        let staging = self.staging(source, market_id);
        let started = Instant::now();

        let Some(start) = self.resume_cursor(collector, scope, market_id).await? else {
            return Ok(PairOutcome::Completed(PairStatus::Failed));
        };
        if start == Cursor::Start {
            staging.clear()?;
            self.manifest.reset_pair(&key).await?;
        }
        self.manifest.start_pair(source, market_id).await?;

        // Distinct keys already staged by an earlier attempt count toward the cap
        let mut seen: HashSet<String> = HashSet::new();
        if let Some(cap) = &cap {
            let staged: Vec<C::Record> = staging.load()?;
            seen.extend(staged.iter().filter_map(cap.key));
        }

        let mut committed = self.manifest.pair(&key).await.map_or(0, |p| p.records);
        let mut stream = PageStream::new(collector, scope, start, self.stop.clone())
            .max_retries(self.max_retries)
            .retry_delay(self.retry_delay(source));

        let (status, error) = loop {
            match stream.next().await {
                Step::Batch(batch) => {
                    staging.append(&batch.records)?;
                    committed += batch.records.len() as u64;
                    self.manifest
                        .record_page(&key, batch.checkpoint, batch.records.len(), batch.malformed)
                        .await?;

                    if let Some(cap) = &cap {
                        seen.extend(batch.records.iter().filter_map(cap.key));
                        if seen.len() >= cap.limit {
                            info!(pair = %key, distinct = seen.len(), "Record limit reached");
                            break (PairStatus::Succeeded, None);
                        }
                    }
                }
                Step::Exhausted => break (PairStatus::Succeeded, None),
                Step::Stopped => {
                    info!(pair = %key, records = committed, "Pair stopped at checkpoint");
                    return Ok(PairOutcome::Stopped);
                }
                Step::Failed(e) => {
                    let status = if committed > 0 {
                        PairStatus::Partial
                    } else {
                        PairStatus::Failed
                    };
                    warn!(pair = %key, error = %e, kind = e.kind(), "Pair failed");
                    break (status, Some(e.to_string()));
                }
            }
        };

        self.manifest
            .finish_pair(&key, status, stream.retries(), error)
            .await?;
        telemetry::record_pair(source, status.as_str(), started.elapsed());
        info!(
            pair = %key,
            status = status.as_str(),
            records = committed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pair finished"
        );
        Ok(PairOutcome::Completed(status))
    }

    /// Write a market's social CSV from its staging file
    fn write_social(&self, source: SourceKind, market_id: &str) -> io::Result<usize> {
        let staging = self.staging(source, Some(market_id));
        let posts: Vec<SocialPost> = staging.load()?;
        let posts = dedup_posts(posts);
        write_social_csv(&self.layout.social_csv(source, market_id), &posts)
    }

    async fn collect_social_pair<C: SocialCollector>(
        &self,
        collector: &C,
        scope: SocialScope,
    ) -> Result<(), CollectError> {
        let source = collector.source();
        let market_id = scope.market_id.clone();
        let outcome = self.drive(collector, &scope, Some(&market_id), None).await?;

        match outcome {
            PairOutcome::Completed(PairStatus::Succeeded) => {
                let rows = self.write_social(source, &market_id)?;
                self.staging(source, Some(&market_id)).clear()?;
                debug!(source = %source, market_id = %market_id, rows, "Social output written");
            }
            // Keep staging so the next run resumes where this one failed
            PairOutcome::Completed(PairStatus::Partial) => {
                self.write_social(source, &market_id)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Rebuild outputs of a pair that completed without clearing its staging
    fn recover_social(&self, source: SourceKind, market_id: &str) -> io::Result<()> {
        let staging = self.staging(source, Some(market_id));
        if staging.exists() {
            let rows = self.write_social(source, market_id)?;
            staging.clear()?;
            info!(source = %source, market_id, rows, "Recovered social output from staging");
        }
        Ok(())
    }
}

/// Result of the discovery phase
enum Discovery {
    Markets { markets: Vec<Market>, reloaded: bool },
    Stopped,
    Failed,
}

/// Drives a collection run over a market source and optional social sources
pub struct Orchestrator<P = PolymarketCollector, R = RedditCollector, T = TwitterCollector> {
    ctx: PairContext,
    options: RunOptions,
    windows: WindowCalculator,
    queries: QuerySetBuilder,
    polymarket: Arc<P>,
    reddit: Option<SocialSource<R>>,
    twitter: Option<SocialSource<T>>,
}

impl<P, R, T> Orchestrator<P, R, T>
where
    P: MarketCollector + 'static,
    R: SocialCollector + 'static,
    T: SocialCollector + 'static,
{
    /// Open (or start) the run manifest under `layout`
    pub fn new(
        layout: OutputLayout,
        polymarket: P,
        options: RunOptions,
        stop: StopSignal,
    ) -> io::Result<Self> {
        if options.fresh {
            match std::fs::remove_dir_all(layout.staging_dir()) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        layout.ensure_dirs()?;
        let manifest = Arc::new(ManifestStore::open(layout.manifest(), options.fresh)?);

        Ok(Self {
            ctx: PairContext {
                layout,
                manifest,
                stop,
                max_retries: options.max_retries,
                retry_delays: HashMap::new(),
                reset_mismatched: options.reset_mismatched,
            },
            options,
            windows: WindowCalculator::with_defaults(),
            queries: QuerySetBuilder::new(),
            polymarket: Arc::new(polymarket),
            reddit: None,
            twitter: None,
        })
    }

    pub fn with_reddit(mut self, collector: R, fan_out: usize) -> Self {
        self.reddit = Some(SocialSource {
            collector: Arc::new(collector),
            fan_out: fan_out.max(1),
        });
        self
    }

    pub fn with_twitter(mut self, collector: T, fan_out: usize) -> Self {
        self.twitter = Some(SocialSource {
            collector: Arc::new(collector),
            fan_out: fan_out.max(1),
        });
        self
    }

    pub fn with_window_params(mut self, params: WindowParams) -> Self {
        self.windows = WindowCalculator::new(params);
        self
    }

    /// Delays between retries of `source`'s transient failures
    pub fn with_retry_delay(mut self, source: SourceKind, policy: BackoffPolicy) -> Self {
        self.ctx.retry_delays.insert(source, policy);
        self
    }

    pub fn retry_delay(&self, source: SourceKind) -> BackoffPolicy {
        self.ctx.retry_delay(source)
    }

    pub fn manifest(&self) -> Arc<ManifestStore> {
        Arc::clone(&self.ctx.manifest)
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.ctx.layout
    }

    /// Run every phase; only local I/O failures are returned as errors
    pub async fn run(&self) -> Result<RunSummary, CollectError> {
        let manifest = &self.ctx.manifest;
        manifest.set_status(RunStatus::Running).await?;

        let (markets, reloaded) = match self.discover().await? {
            Discovery::Markets { markets, reloaded } => (markets, reloaded),
            Discovery::Stopped => return self.finalize(None).await,
            Discovery::Failed => return self.finalize(Some(RunStatus::Failed)).await,
        };
        info!(markets = markets.len(), "Discovery complete");

        let markets = self.collect_histories(markets, reloaded).await?;
        if self.ctx.stop.is_stopped() {
            return self.finalize(None).await;
        }

        let scopes = self.build_windows(&markets).await?;
        self.collect_social(&scopes).await?;
        self.finalize(None).await
    }

    /// Collect one user's positions into `positions_<address>.jsonl`
    pub async fn collect_positions(&self, address: &str) -> Result<RunSummary, CollectError> {
        let manifest = &self.ctx.manifest;
        manifest.set_status(RunStatus::Running).await?;

        let address = address.to_lowercase();
        let pair_id = format!("positions:{address}");
        let scope = PolymarketScope::Positions {
            address: address.clone(),
        };
        let outcome = self
            .ctx
            .drive(&*self.polymarket, &scope, Some(&pair_id), None)
            .await?;

        if outcome != PairOutcome::Stopped {
            let staging = self.ctx.staging(SourceKind::Polymarket, Some(&pair_id));
            let records: Vec<PolymarketRecord> = staging.load()?;
            let positions: Vec<UserPosition> = records
                .into_iter()
                .filter_map(|r| match r {
                    PolymarketRecord::Position(p) => Some(p),
                    _ => None,
                })
                .collect();
            let path = self.ctx.layout.positions(&address);
            let rows = write_jsonl(&path, &positions)?;
            if outcome == PairOutcome::Completed(PairStatus::Succeeded) {
                staging.clear()?;
            }
            info!(address = %address, rows, path = %path.display(), "Positions written");
        }
        self.finalize(None).await
    }

    async fn discover(&self) -> Result<Discovery, CollectError> {
        let key = pair_key(SourceKind::Polymarket, None);
        let staging = self.ctx.staging(SourceKind::Polymarket, None);
        let markets_path = self.ctx.layout.markets();

        if self.ctx.manifest.snapshot().await.is_succeeded(&key) && !staging.exists() {
            let markets: Vec<Market> = read_jsonl(&markets_path)?;
            info!(markets = markets.len(), "Reloaded markets from previous run");
            return Ok(Discovery::Markets {
                markets,
                reloaded: true,
            });
        }

        let scopes = match self.polymarket.discover().await {
            Ok(scopes) => scopes,
            Err(e) => {
                error!(error = %e, "Market discovery failed");
                self.ctx.manifest.start_pair(SourceKind::Polymarket, None).await?;
                self.ctx
                    .manifest
                    .finish_pair(&key, PairStatus::Failed, 0, Some(e.to_string()))
                    .await?;
                return Ok(Discovery::Failed);
            }
        };
        let Some(scope) = scopes
            .into_iter()
            .find(|s| matches!(s, PolymarketScope::Markets))
        else {
            return Ok(Discovery::Failed);
        };

        let succeeded = self.ctx.manifest.snapshot().await.is_succeeded(&key);
        let status = if succeeded {
            // Completed before a crash; rebuild markets.jsonl from staging
            PairStatus::Succeeded
        } else {
            match self
                .ctx
                .drive(
                    &*self.polymarket,
                    &scope,
                    None,
                    self.options.max_markets.map(|limit| RecordCap {
                        limit,
                        key: market_key,
                    }),
                )
                .await?
            {
                PairOutcome::Stopped => return Ok(Discovery::Stopped),
                PairOutcome::Completed(status) => status,
            }
        };

        let stats = self.polymarket.filter_stats();
        info!(
            accepted = stats.accepted,
            rejected = stats.total_rejected(),
            "Market filter"
        );
        for (reason, count) in &stats.rejected {
            debug!(reason = %reason, count, "Markets rejected");
        }

        if status == PairStatus::Failed {
            return Ok(Discovery::Failed);
        }

        let records: Vec<PolymarketRecord> = staging.load()?;
        let markets = dedup_by_id(
            records.into_iter().filter_map(|r| match r {
                PolymarketRecord::Market(m) => Some(m),
                _ => None,
            }),
            self.options.max_markets,
        );
        write_jsonl(&markets_path, &markets)?;
        if status == PairStatus::Succeeded {
            staging.clear()?;
        }

        Ok(Discovery::Markets {
            markets,
            reloaded: false,
        })
    }

    /// Attach YES-token price histories and write the market files
    async fn collect_histories(
        &self,
        mut markets: Vec<Market>,
        reloaded: bool,
    ) -> Result<Vec<Market>, CollectError> {
        let snapshot = self.ctx.manifest.snapshot().await;
        let mut jobs = Vec::new();
        let mut recovered = Vec::new();

        for (idx, market) in markets.iter().enumerate() {
            let key = pair_key(SourceKind::Polymarket, Some(&market.id));
            let staging = self.ctx.staging(SourceKind::Polymarket, Some(&market.id));
            // Histories of reloaded markets are already in markets.jsonl
            if reloaded && snapshot.is_succeeded(&key) {
                if staging.exists() {
                    recovered.push(idx);
                }
                continue;
            }
            if let Some(scope) = self.polymarket.history_scope(market) {
                jobs.push((idx, scope));
            }
        }

        if !jobs.is_empty() {
            info!(pairs = jobs.len(), "Collecting price histories");
        }

        let ctx = &self.ctx;
        let polymarket = &*self.polymarket;
        let results: Vec<(usize, Result<PairOutcome, CollectError>)> = stream::iter(jobs)
            .map(|(idx, scope)| {
                let market_id = markets[idx].id.clone();
                async move {
                    let res = ctx.drive(polymarket, &scope, Some(&market_id), None).await;
                    (idx, res)
                }
            })
            .buffer_unordered(self.options.history_fan_out.max(1))
            .collect()
            .await;

        let mut completed = recovered;
        for (idx, res) in results {
            if res? == PairOutcome::Completed(PairStatus::Succeeded) {
                completed.push(idx);
            }
        }

        for &idx in &completed {
            let market = &mut markets[idx];
            let staging = self.ctx.staging(SourceKind::Polymarket, Some(&market.id));
            let records: Vec<PolymarketRecord> = staging.load()?;
            let points: Vec<PricePoint> = records
                .into_iter()
                .filter_map(|r| match r {
                    PolymarketRecord::Price(p) => Some(p),
                    _ => None,
                })
                .collect();
            self.polymarket.attach_history(market, points);
        }

        let rows: Vec<PriceHistoryRow> = markets
            .iter()
            .flat_map(PriceHistoryRow::from_market)
            .collect();
        write_jsonl(&self.ctx.layout.markets(), &markets)?;
        let written = write_jsonl(&self.ctx.layout.prices_history(), &rows)?;
        debug!(markets = markets.len(), price_rows = written, "Market files written");

        for &idx in &completed {
            self.ctx
                .staging(SourceKind::Polymarket, Some(&markets[idx].id))
                .clear()?;
        }
        Ok(markets)
    }

    /// Derive query sets and windows; returns the social scopes to collect
    async fn build_windows(&self, markets: &[Market]) -> Result<Vec<SocialScope>, CollectError> {
        let mut query_sets = BTreeMap::new();
        let mut windows = BTreeMap::new();
        let mut scopes = Vec::new();
        let mut warnings = Vec::new();

        for market in markets {
            let query = self.queries.build(market);
            query_sets.insert(market.id.clone(), query.clone());

            match self.windows.compute(market) {
                Ok(w) => {
                    warnings.extend(w.warnings.iter().map(|msg| format!("{}: {msg}", market.id)));
                    windows.insert(market.id.clone(), w.clone());
                    scopes.push(SocialScope::new(query, w));
                }
                Err(e) => {
                    warn!(market_id = %market.id, error = %e, "No collection window");
                    warnings.push(e.to_string());
                }
            }
        }

        write_json(&self.ctx.layout.query_sets(), &query_sets)?;
        write_json(&self.ctx.layout.windows(), &windows)?;
        if !warnings.is_empty() {
            self.ctx
                .manifest
                .update(|m| {
                    for w in warnings {
                        if !m.warnings.contains(&w) {
                            m.warnings.push(w);
                        }
                    }
                })
                .await?;
        }

        info!(
            query_sets = query_sets.len(),
            windowed = scopes.len(),
            "Windows built"
        );
        Ok(scopes)
    }

    async fn collect_social(&self, scopes: &[SocialScope]) -> Result<(), CollectError> {
        let reddit = async {
            match &self.reddit {
                Some(source) => self.collect_source(source, scopes).await,
                None => Ok(()),
            }
        };
        let twitter = async {
            match &self.twitter {
                Some(source) => self.collect_source(source, scopes).await,
                None => Ok(()),
            }
        };
        let (reddit, twitter) = tokio::join!(reddit, twitter);
        reddit?;
        twitter
    }

    /// Collect every market from one social source, `fan_out` at a time
    async fn collect_source<C: SocialCollector + 'static>(
        &self,
        source: &SocialSource<C>,
        scopes: &[SocialScope],
    ) -> Result<(), CollectError> {
        let kind = source.collector.source();
        let snapshot = self.ctx.manifest.snapshot().await;
        let semaphore = Arc::new(Semaphore::new(source.fan_out));
        let mut tasks = JoinSet::new();
        let mut first_error = None;

        info!(
            source = %kind,
            markets = scopes.len(),
            fan_out = source.fan_out,
            "Collecting social posts"
        );

        for scope in scopes {
            if snapshot.is_succeeded(&pair_key(kind, Some(&scope.market_id))) {
                self.ctx.recover_social(kind, &scope.market_id)?;
                continue;
            }
            if self.ctx.stop.is_stopped() {
                break;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| CollectError::Source(format!("fan-out semaphore closed: {e}")))?;
            let ctx = self.ctx.clone();
            let collector = Arc::clone(&source.collector);
            let scope = scope.clone();
            tasks.spawn(async move {
                let _permit = permit;
                ctx.collect_social_pair(&*collector, scope).await
            });

            while let Some(done) = tasks.try_join_next() {
                Self::absorb(kind, done, &mut first_error);
            }
        }

        while let Some(done) = tasks.join_next().await {
            Self::absorb(kind, done, &mut first_error);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn absorb(
        kind: SourceKind,
        done: Result<Result<(), CollectError>, tokio::task::JoinError>,
        first_error: &mut Option<CollectError>,
    ) {
        match done {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(source = %kind, error = %e, "Social pair aborted");
                first_error.get_or_insert(e);
            }
            Err(e) => error!(source = %kind, error = %e, "Social pair task panicked"),
        }
    }

    /// Persist the terminal status; `forced` overrides the pair-derived one
    async fn finalize(&self, forced: Option<RunStatus>) -> Result<RunSummary, CollectError> {
        let manifest = &self.ctx.manifest;
        let snapshot = manifest.snapshot().await;
        let status = match forced {
            Some(status) => status,
            None if self.ctx.stop.is_stopped() && snapshot.incomplete().next().is_some() => {
                RunStatus::Interrupted
            }
            None => snapshot.outcome(),
        };

        manifest.set_status(status).await?;
        let summary = RunSummary::from_manifest(&manifest.snapshot().await);
        info!(
            status = %status,
            succeeded = summary.succeeded,
            incomplete = summary.incomplete,
            records = summary.records,
            "Run finished"
        );
        Ok(summary)
    }
}
