//! Collector types

use crate::query::QuerySet;
use crate::window::MarketWindows;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// A data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Polymarket,
    Reddit,
    Twitter,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Polymarket => "polymarket",
            SourceKind::Reddit => "reddit",
            SourceKind::Twitter => "twitter",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = CollectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polymarket" => Ok(SourceKind::Polymarket),
            "reddit" => Ok(SourceKind::Reddit),
            "twitter" | "x" => Ok(SourceKind::Twitter),
            other => Err(CollectError::Source(format!("unknown source: {other}"))),
        }
    }
}

/// Collection errors
#[derive(Debug, Error)]
pub enum CollectError {
    /// Network failure, timeout or 5xx; retried
    #[error("Transient error: {0}")]
    Transient(String),
    /// Source signalled throttling (HTTP 429); retried after backoff
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// A single record could not be normalized; skipped
    #[error("Malformed record: {0}")]
    MalformedRecord(String),
    /// A checkpoint no longer matches its source
    #[error("Resume mismatch: {0}")]
    ResumeMismatch(String),
    /// Non-retryable source failure (4xx, bad credentials, bad response shape)
    #[error("Source error: {0}")]
    Source(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            CollectError::RateLimited(format!("{context}: HTTP {status}"))
        } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            CollectError::Transient(format!("{context}: HTTP {status}"))
        } else {
            CollectError::Source(format!("{context}: HTTP {status}"))
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollectError::Transient(_) | CollectError::RateLimited(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, CollectError::RateLimited(_))
    }

    /// Short label used in the manifest and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Transient(_) => "transient",
            CollectError::RateLimited(_) => "rate_limited",
            CollectError::MalformedRecord(_) => "malformed_record",
            CollectError::ResumeMismatch(_) => "resume_mismatch",
            CollectError::Source(_) => "source",
            CollectError::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for CollectError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CollectError::from_status(status, "request failed"),
            None if err.is_decode() => CollectError::Source(format!("undecodable response: {err}")),
            None => CollectError::Transient(err.to_string()),
        }
    }
}

/// Position inside a set of dump files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpPosition {
    /// Index into the sorted dump file list
    pub file_index: usize,
    /// Path of that file, checked on resume
    pub file: PathBuf,
    /// Lines consumed from the file
    pub line: u64,
    /// Bytes of the decoded stream consumed
    pub byte_offset: u64,
}

/// Where the next page of a scope starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cursor {
    #[default]
    Start,
    /// Opaque token returned by the source (`next_cursor`, `after`, `next_token`)
    Token { token: String },
    /// Offset-paginated endpoints and chunked time ranges
    Offset { offset: u64 },
    Dump(DumpPosition),
}

/// One page of raw records
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Value>,
    /// `None` when the scope is exhausted
    pub next: Option<Cursor>,
}

impl Page {
    pub fn new(records: Vec<Value>, next: Option<Cursor>) -> Self {
        Self { records, next }
    }

    /// Final page of a scope
    pub fn last(records: Vec<Value>) -> Self {
        Self::new(records, None)
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Resume token stored in the run manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: SourceKind,
    /// Identity of the scope the cursor belongs to
    pub fingerprint: String,
    /// Cursor of the next page to fetch
    pub cursor: Cursor,
    pub taken_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(source: SourceKind, fingerprint: impl Into<String>, cursor: Cursor) -> Self {
        Self {
            source,
            fingerprint: fingerprint.into(),
            cursor,
            taken_at: Utc::now(),
        }
    }
}

/// A normalized Reddit submission/comment or tweet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialPost {
    pub source: SourceKind,
    /// Unique within `source`
    pub post_id: String,
    pub market_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    /// Subreddit for Reddit posts
    #[serde(default)]
    pub channel: Option<String>,
    /// Casefolded hashtags carried by the record, without `#`
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Metric name -> count (score, num_comments, likes, retweets, ...)
    #[serde(default)]
    pub engagement: BTreeMap<String, u64>,
}

impl SocialPost {
    /// Deduplication key within a market
    pub fn key(&self) -> (SourceKind, &str) {
        (self.source, self.post_id.as_str())
    }
}

/// What a social collector gathers for one market
#[derive(Debug, Clone)]
pub struct SocialScope {
    pub market_id: String,
    pub query: QuerySet,
    pub windows: MarketWindows,
}

impl SocialScope {
    pub fn new(query: QuerySet, windows: MarketWindows) -> Self {
        Self {
            market_id: query.market_id.clone(),
            query,
            windows,
        }
    }

    /// Whether a post falls inside a window and matches the query set
    pub fn admits(&self, post: &SocialPost) -> bool {
        self.windows.contains(post.timestamp) && self.query.matches(&post.text, &post.hashtags)
    }

    /// Identity of the scope, independent of backend
    pub fn fingerprint(&self) -> String {
        let (start, end) = self.windows.envelope();
        format!(
            "{}:{}:{}",
            self.market_id,
            start.timestamp(),
            end.timestamp()
        )
    }
}

/// `#tags` written inline in a post, casefolded and without the `#`
pub fn inline_hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let Some(rest) = token.strip_prefix('#') else {
            continue;
        };
        let tag: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .flat_map(char::to_lowercase)
            .collect();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}
