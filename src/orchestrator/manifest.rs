//! Run manifest: per-pair progress, checkpoints and errors
//!
//! The manifest is rewritten atomically after every committed page and every
//! pair completion, so an interrupted run resumes from the last checkpoint.

use crate::collector::{Checkpoint, SourceKind};
use crate::data::{read_json, write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Overall run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    /// Some pairs failed, the rest completed
    Partial,
    Failed,
    /// Stopped by the operator; resumable
    Interrupted,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed | RunStatus::Running => 1,
            RunStatus::Partial => 2,
            RunStatus::Interrupted => 130,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// State of one (source, market) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Failed after committing some records; those records were written
    Partial,
}

impl PairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairStatus::Pending => "pending",
            PairStatus::Running => "running",
            PairStatus::Succeeded => "succeeded",
            PairStatus::Failed => "failed",
            PairStatus::Partial => "partial",
        }
    }

    /// Whether the pair needs (re-)collection
    pub fn is_incomplete(&self) -> bool {
        !matches!(self, PairStatus::Succeeded)
    }
}

/// Manifest key of a pair: `polymarket`, `polymarket:<id>`, `reddit:<id>`, ...
pub fn pair_key(source: SourceKind, market_id: Option<&str>) -> String {
    match market_id {
        Some(id) => format!("{source}:{id}"),
        None => source.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    pub source: SourceKind,
    #[serde(default)]
    pub market_id: Option<String>,
    pub status: PairStatus,
    /// Resume point of the next page
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    /// Records committed to staging or output
    #[serde(default)]
    pub records: u64,
    #[serde(default)]
    pub malformed: u64,
    /// Runs that worked on this pair
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PairRecord {
    fn new(source: SourceKind, market_id: Option<&str>) -> Self {
        Self {
            source,
            market_id: market_id.map(str::to_string),
            status: PairStatus::Pending,
            checkpoint: None,
            records: 0,
            malformed: 0,
            attempts: 0,
            retries: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub pair: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pairs: BTreeMap<String, PairRecord>,
    #[serde(default)]
    pub error_log: Vec<ErrorEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Default for RunManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl RunManifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            finished_at: None,
            pairs: BTreeMap::new(),
            error_log: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn pair(&self, key: &str) -> Option<&PairRecord> {
        self.pairs.get(key)
    }

    /// Register a pair as pending unless it is already known
    pub fn ensure_pair(&mut self, source: SourceKind, market_id: Option<&str>) -> &mut PairRecord {
        self.pairs
            .entry(pair_key(source, market_id))
            .or_insert_with(|| PairRecord::new(source, market_id))
    }

    pub fn is_succeeded(&self, key: &str) -> bool {
        self.pair(key)
            .is_some_and(|p| p.status == PairStatus::Succeeded)
    }

    /// Pair count per status
    pub fn counts(&self) -> BTreeMap<PairStatus, usize> {
        let mut counts = BTreeMap::new();
        for pair in self.pairs.values() {
            *counts.entry(pair.status).or_insert(0) += 1;
        }
        counts
    }

    /// Terminal status from pair outcomes
    ///
    /// Failed when nothing succeeded but something failed, partial when
    /// successes and failures coexist, succeeded otherwise.
    pub fn outcome(&self) -> RunStatus {
        let succeeded = self
            .pairs
            .values()
            .filter(|p| p.status == PairStatus::Succeeded)
            .count();
        let failed = self
            .pairs
            .values()
            .filter(|p| matches!(p.status, PairStatus::Failed | PairStatus::Partial))
            .count();

        match (succeeded, failed) {
            (0, f) if f > 0 => RunStatus::Failed,
            (_, 0) => RunStatus::Succeeded,
            _ => RunStatus::Partial,
        }
    }

    /// Pairs that need re-collection, with their last error
    pub fn incomplete(&self) -> impl Iterator<Item = (&str, &PairRecord)> {
        self.pairs
            .iter()
            .filter(|(_, p)| p.status.is_incomplete())
            .map(|(k, p)| (k.as_str(), p))
    }
}

/// Shared, persisted manifest
pub struct ManifestStore {
    path: PathBuf,
    inner: Mutex<RunManifest>,
}

impl ManifestStore {
    /// Load the manifest at `path`, or start a new run when there is none
    /// or `fresh` is set
    pub fn open(path: impl Into<PathBuf>, fresh: bool) -> io::Result<Self> {
        let path = path.into();
        let manifest = if fresh {
            None
        } else {
            read_json::<RunManifest>(&path)?
        };

        let manifest = match manifest {
            Some(mut m) => {
                tracing::info!(
                    run_id = %m.run_id,
                    pairs = m.pairs.len(),
                    previous_status = %m.status,
                    "Resuming run"
                );
                m.status = RunStatus::Running;
                m.finished_at = None;
                m
            }
            None => {
                let m = RunManifest::new();
                tracing::info!(run_id = %m.run_id, "Starting new run");
                m
            }
        };

        Ok(Self {
            path,
            inner: Mutex::new(manifest),
        })
    }

    /// Read a manifest without taking ownership of the run
    pub fn read(path: &Path) -> io::Result<Option<RunManifest>> {
        read_json(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> RunManifest {
        self.inner.lock().await.clone()
    }

    pub async fn pair(&self, key: &str) -> Option<PairRecord> {
        self.inner.lock().await.pair(key).cloned()
    }

    /// Apply `f` and persist the result while holding the lock
    pub async fn update<F, T>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce(&mut RunManifest) -> T,
    {
        let mut manifest = self.inner.lock().await;
        let out = f(&mut manifest);
        manifest.updated_at = Utc::now();
        write_json(&self.path, &*manifest)?;
        Ok(out)
    }

    pub async fn persist(&self) -> io::Result<()> {
        self.update(|_| ()).await
    }

    /// Mark a pair running for this invocation
    pub async fn start_pair(&self, source: SourceKind, market_id: Option<&str>) -> io::Result<()> {
        self.update(|m| {
            let pair = m.ensure_pair(source, market_id);
            pair.status = PairStatus::Running;
            pair.attempts += 1;
            pair.error = None;
            pair.updated_at = Utc::now();
        })
        .await
    }

    /// Record a committed page
    ///
    /// The checkpoint only advances when the page has a successor; after the
    /// last page the previous checkpoint is kept until the pair completes.
    pub async fn record_page(
        &self,
        key: &str,
        checkpoint: Option<Checkpoint>,
        records: usize,
        malformed: usize,
    ) -> io::Result<()> {
        self.update(|m| {
            if let Some(pair) = m.pairs.get_mut(key) {
                if checkpoint.is_some() {
                    pair.checkpoint = checkpoint;
                }
                pair.records += records as u64;
                pair.malformed += malformed as u64;
                pair.updated_at = Utc::now();
            }
        })
        .await
    }

    /// Record the end of a pair
    pub async fn finish_pair(
        &self,
        key: &str,
        status: PairStatus,
        retries: u32,
        error: Option<String>,
    ) -> io::Result<()> {
        self.update(|m| {
            let now = Utc::now();
            if let Some(err) = &error {
                m.error_log.push(ErrorEntry {
                    pair: key.to_string(),
                    error: err.clone(),
                    at: now,
                });
            }
            if let Some(pair) = m.pairs.get_mut(key) {
                pair.status = status;
                pair.retries += retries;
                pair.error = error;
                pair.updated_at = now;
                if status == PairStatus::Succeeded {
                    pair.checkpoint = None;
                }
            }
        })
        .await
    }

    /// Forget a pair's progress so it is collected from scratch
    pub async fn reset_pair(&self, key: &str) -> io::Result<()> {
        self.update(|m| {
            if let Some(pair) = m.pairs.get_mut(key) {
                pair.status = PairStatus::Pending;
                pair.checkpoint = None;
                pair.records = 0;
                pair.malformed = 0;
                pair.updated_at = Utc::now();
            }
        })
        .await
    }

    pub async fn warn(&self, message: impl Into<String>) -> io::Result<()> {
        let message = message.into();
        self.update(|m| {
            if !m.warnings.contains(&message) {
                m.warnings.push(message);
            }
        })
        .await
    }

    /// Set the run status, stamping `finished_at` for terminal states
    pub async fn set_status(&self, status: RunStatus) -> io::Result<()> {
        self.update(|m| {
            m.status = status;
            m.finished_at = (status != RunStatus::Running).then(Utc::now);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Cursor;
    use tempfile::tempdir;

    fn checkpoint(offset: u64) -> Checkpoint {
        Checkpoint::new(SourceKind::Reddit, "fp", Cursor::Offset { offset })
    }

    #[test]
    fn test_pair_key() {
        assert_eq!(pair_key(SourceKind::Polymarket, None), "polymarket");
        assert_eq!(pair_key(SourceKind::Reddit, Some("m1")), "reddit:m1");
        assert_eq!(pair_key(SourceKind::Twitter, Some("m1")), "twitter:m1");
    }

    #[test]
    fn test_outcome() {
        let mut m = RunManifest::new();
        assert_eq!(m.outcome(), RunStatus::Succeeded);

        m.ensure_pair(SourceKind::Reddit, Some("a")).status = PairStatus::Failed;
        assert_eq!(m.outcome(), RunStatus::Failed);

        m.ensure_pair(SourceKind::Reddit, Some("b")).status = PairStatus::Succeeded;
        assert_eq!(m.outcome(), RunStatus::Partial);

        m.ensure_pair(SourceKind::Reddit, Some("a")).status = PairStatus::Succeeded;
        assert_eq!(m.outcome(), RunStatus::Succeeded);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Succeeded.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Partial.exit_code(), 2);
        assert_eq!(RunStatus::Interrupted.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_progress_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_manifest.json");

        let store = ManifestStore::open(&path, false).unwrap();
        let run_id = store.snapshot().await.run_id;
        store.start_pair(SourceKind::Reddit, Some("m1")).await.unwrap();
        store
            .record_page("reddit:m1", Some(checkpoint(2)), 5, 1)
            .await
            .unwrap();
        store.record_page("reddit:m1", None, 3, 0).await.unwrap();
        store.set_status(RunStatus::Interrupted).await.unwrap();
        drop(store);

        let store = ManifestStore::open(&path, false).unwrap();
        let m = store.snapshot().await;
        assert_eq!(m.run_id, run_id);
        assert_eq!(m.status, RunStatus::Running);
        let pair = m.pair("reddit:m1").unwrap();
        assert_eq!(pair.records, 8);
        assert_eq!(pair.malformed, 1);
        assert_eq!(
            pair.checkpoint.as_ref().map(|c| &c.cursor),
            Some(&Cursor::Offset { offset: 2 })
        );
    }

    #[tokio::test]
    async fn test_fresh_discards_previous_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_manifest.json");

        let store = ManifestStore::open(&path, false).unwrap();
        store.start_pair(SourceKind::Twitter, Some("m1")).await.unwrap();
        let old = store.snapshot().await.run_id;

        let store = ManifestStore::open(&path, true).unwrap();
        let m = store.snapshot().await;
        assert_ne!(m.run_id, old);
        assert!(m.pairs.is_empty());
    }

    #[tokio::test]
    async fn test_finish_and_reset() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::open(dir.path().join("m.json"), false).unwrap();

        store.start_pair(SourceKind::Reddit, Some("m1")).await.unwrap();
        store
            .record_page("reddit:m1", Some(checkpoint(1)), 2, 0)
            .await
            .unwrap();
        store
            .finish_pair("reddit:m1", PairStatus::Failed, 3, Some("boom".into()))
            .await
            .unwrap();

        let m = store.snapshot().await;
        let pair = m.pair("reddit:m1").unwrap();
        assert_eq!(pair.status, PairStatus::Failed);
        assert_eq!(pair.retries, 3);
        assert!(pair.checkpoint.is_some());
        assert_eq!(m.error_log.len(), 1);
        assert_eq!(m.incomplete().count(), 1);

        store.reset_pair("reddit:m1").await.unwrap();
        let pair = store.pair("reddit:m1").await.unwrap();
        assert_eq!(pair.status, PairStatus::Pending);
        assert!(pair.checkpoint.is_none());
        assert_eq!(pair.records, 0);
    }

    #[tokio::test]
    async fn test_success_clears_checkpoint() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::open(dir.path().join("m.json"), false).unwrap();

        store.start_pair(SourceKind::Reddit, Some("m1")).await.unwrap();
        store
            .record_page("reddit:m1", Some(checkpoint(1)), 1, 0)
            .await
            .unwrap();
        store
            .finish_pair("reddit:m1", PairStatus::Succeeded, 0, None)
            .await
            .unwrap();

        let m = store.snapshot().await;
        assert!(m.is_succeeded("reddit:m1"));
        assert!(m.pair("reddit:m1").unwrap().checkpoint.is_none());
        assert_eq!(m.counts().get(&PairStatus::Succeeded), Some(&1));
    }

    #[tokio::test]
    async fn test_warnings_are_deduplicated() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::open(dir.path().join("m.json"), false).unwrap();
        store.warn("no anchor for m1").await.unwrap();
        store.warn("no anchor for m1").await.unwrap();
        assert_eq!(store.snapshot().await.warnings.len(), 1);
    }
}
