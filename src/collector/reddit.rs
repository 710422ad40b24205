//! Reddit collector
//!
//! Two backends behind one collector: Pushshift-style dump files, or the live
//! API with an application-only OAuth token and the listing `after` cursor.

use super::dump::DumpSet;
use super::http::HttpClient;
use super::types::{
    inline_hashtags, Checkpoint, CollectError, Cursor, Page, SocialPost, SocialScope, SourceKind,
};
use super::SourceCollector;
use crate::fields::{pick, pick_str, pick_u64};
use crate::time;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// OAuth API host
pub const REDDIT_API_URL: &str = "https://oauth.reddit.com";

/// Token endpoint for application-only OAuth
pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Terms OR-ed into one search query
const MAX_QUERY_TERMS: usize = 6;

/// Live API credentials and endpoints
#[derive(Debug, Clone)]
pub struct RedditApiConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub auth_url: String,
}

impl RedditApiConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: REDDIT_API_URL.to_string(),
            auth_url: REDDIT_AUTH_URL.to_string(),
        }
    }
}

/// Live Reddit API access
pub struct RedditApi {
    config: RedditApiConfig,
    http: HttpClient,
    token: Mutex<Option<(String, Instant)>>,
}

impl RedditApi {
    pub fn new(config: RedditApiConfig, http: HttpClient) -> Self {
        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    /// Cached bearer token, refreshed a minute before expiry
    async fn access_token(&self) -> Result<String, CollectError> {
        let mut guard = self.token.lock().await;
        if let Some((token, expires)) = guard.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let request = self
            .http
            .client()
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let body = self.http.send(request, &self.config.auth_url).await?;

        let token = pick_str(&body, &["access_token"]).ok_or_else(|| {
            CollectError::Source("Reddit token response has no access_token".to_string())
        })?;
        let ttl = pick_u64(&body, &["expires_in"]).unwrap_or(3600).saturating_sub(60);
        *guard = Some((token.clone(), Instant::now() + std::time::Duration::from_secs(ttl)));

        tracing::debug!(expires_in = ttl, "Obtained Reddit access token");
        Ok(token)
    }

    async fn search(
        &self,
        subreddits: &[String],
        scope: &SocialScope,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, CollectError> {
        let after = match cursor {
            Cursor::Start => None,
            Cursor::Token { token } => Some(token.clone()),
            _ => {
                return Err(CollectError::ResumeMismatch(format!(
                    "cursor {cursor:?} is not a Reddit listing cursor"
                )))
            }
        };

        let url = if subreddits.is_empty() {
            format!("{}/search", self.config.base_url)
        } else {
            format!("{}/r/{}/search", self.config.base_url, subreddits.join("+"))
        };

        let mut query = vec![
            ("q", scope.query.search_query(MAX_QUERY_TERMS)),
            ("sort", "new".to_string()),
            ("t", "all".to_string()),
            ("limit", page_size.min(100).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if !subreddits.is_empty() {
            query.push(("restrict_sr", "1".to_string()));
        }
        if let Some(after) = after {
            query.push(("after", after));
        }

        let token = self.access_token().await?;
        let request = self.http.client().get(&url).query(&query).bearer_auth(token);
        let body = self.http.send(request, &url).await?;

        let (records, after) = parse_listing(body)?;

        // results are newest first; stop once the page is older than every window
        let (window_start, _) = scope.windows.envelope();
        let exhausted = records
            .last()
            .and_then(|r| pick(r, &["created_utc", "created"]))
            .and_then(time::parse_value)
            .is_some_and(|oldest| oldest < window_start);

        let next = after
            .filter(|_| !exhausted)
            .map(|token| Cursor::Token { token });
        Ok(Page::new(records, next))
    }
}

/// Where Reddit records come from
pub enum RedditBackend {
    Dump(DumpSet),
    Api(RedditApi),
}

/// Collector for Reddit submissions and comments
pub struct RedditCollector {
    backend: RedditBackend,
    /// Casefolded subreddit allow-list; empty admits every subreddit
    subreddits: Vec<String>,
    page_size: usize,
}

impl RedditCollector {
    /// Create a new collector
    pub fn new(backend: RedditBackend, subreddits: &[String], page_size: usize) -> Self {
        Self {
            backend,
            subreddits: subreddits
                .iter()
                .map(|s| s.trim().trim_start_matches("r/").to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            page_size: page_size.max(1),
        }
    }

    fn backend_id(&self) -> String {
        match &self.backend {
            RedditBackend::Dump(dump) => dump.fingerprint(),
            RedditBackend::Api(_) => format!("api:{}", self.subreddits.join("+")),
        }
    }
}

#[async_trait]
impl SourceCollector for RedditCollector {
    type Scope = SocialScope;
    type Record = SocialPost;

    fn source(&self) -> SourceKind {
        SourceKind::Reddit
    }

    /// Reddit scopes come from the markets; nothing to enumerate
    async fn discover(&self) -> Result<Vec<SocialScope>, CollectError> {
        Ok(Vec::new())
    }

    async fn fetch_page(&self, scope: &SocialScope, cursor: &Cursor) -> Result<Page, CollectError> {
        match &self.backend {
            RedditBackend::Dump(dump) => dump.read_page(cursor, self.page_size).await,
            RedditBackend::Api(api) => {
                api.search(&self.subreddits, scope, cursor, self.page_size)
                    .await
            }
        }
    }

    fn normalize(&self, scope: &SocialScope, raw: &Value) -> Result<SocialPost, CollectError> {
        normalize_post(&scope.market_id, raw)
    }

    fn retain(&self, scope: &SocialScope, post: &SocialPost) -> bool {
        let subreddit_ok = self.subreddits.is_empty()
            || post
                .channel
                .as_ref()
                .is_some_and(|c| self.subreddits.contains(&c.to_lowercase()));
        subreddit_ok && scope.admits(post)
    }

    fn fingerprint(&self, scope: &SocialScope) -> String {
        format!("reddit:{}:{}", self.backend_id(), scope.fingerprint())
    }

    fn validate_resume(
        &self,
        scope: &SocialScope,
        checkpoint: &Checkpoint,
    ) -> Result<(), CollectError> {
        let expected = self.fingerprint(scope);
        if checkpoint.source != SourceKind::Reddit || checkpoint.fingerprint != expected {
            return Err(CollectError::ResumeMismatch(format!(
                "checkpoint {} does not match {}",
                checkpoint.fingerprint, expected
            )));
        }
        match (&self.backend, &checkpoint.cursor) {
            (RedditBackend::Dump(dump), Cursor::Dump(pos)) => dump.validate(pos),
            (RedditBackend::Dump(_), Cursor::Start) => Ok(()),
            (RedditBackend::Api(_), Cursor::Start | Cursor::Token { .. }) => Ok(()),
            (_, cursor) => Err(CollectError::ResumeMismatch(format!(
                "cursor {cursor:?} does not fit the configured Reddit backend"
            ))),
        }
    }
}

/// Split a listing (`{data: {children: [{data: ...}], after}}`) into records and cursor
fn parse_listing(body: Value) -> Result<(Vec<Value>, Option<String>), CollectError> {
    let data = body
        .get("data")
        .ok_or_else(|| CollectError::Source("Reddit listing has no data".to_string()))?;

    let records = match data.get("children") {
        Some(Value::Array(children)) => children
            .iter()
            .map(|child| child.get("data").cloned().unwrap_or_else(|| child.clone()))
            .collect(),
        _ => Vec::new(),
    };
    let after = data
        .get("after")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    Ok((records, after))
}

/// Normalize a submission or comment from a dump line or API listing
pub fn normalize_post(market_id: &str, raw: &Value) -> Result<SocialPost, CollectError> {
    if !raw.is_object() {
        return Err(CollectError::MalformedRecord(format!(
            "Reddit record is not an object: {}",
            truncate(&raw.to_string(), 80)
        )));
    }

    let post_id = fullname(raw)
        .ok_or_else(|| CollectError::MalformedRecord("Reddit record has no id".to_string()))?;

    let timestamp = pick(raw, &["created_utc", "created"])
        .and_then(time::parse_value)
        .ok_or_else(|| {
            CollectError::MalformedRecord(format!("Reddit record {post_id} has no timestamp"))
        })?;

    // submissions carry title + selftext, comments carry body
    let title = pick_str(raw, &["title"]).unwrap_or_default();
    let body = pick_str(raw, &["selftext", "body"])
        .filter(|b| b != "[removed]" && b != "[deleted]")
        .unwrap_or_default();
    let text = match (title.is_empty(), body.is_empty()) {
        (false, false) => format!("{title}\n\n{body}"),
        (false, true) => title,
        _ => body,
    };

    let mut engagement = BTreeMap::new();
    for (metric, keys) in [
        ("score", &["score"][..]),
        ("upvotes", &["ups"][..]),
        ("num_comments", &["num_comments"][..]),
    ] {
        if let Some(count) = pick_u64(raw, keys) {
            engagement.insert(metric.to_string(), count);
        }
    }

    Ok(SocialPost {
        source: SourceKind::Reddit,
        post_id,
        market_id: market_id.to_string(),
        author: pick_str(raw, &["author"]).unwrap_or_else(|| "[deleted]".to_string()),
        timestamp,
        hashtags: inline_hashtags(&text),
        text,
        channel: pick_str(raw, &["subreddit"]),
        engagement,
    })
}

/// `t1_<id>` for comments and `t3_<id>` for submissions
///
/// Comment and submission ids are drawn from separate sequences, so the bare
/// id is not unique across both kinds.
fn fullname(raw: &Value) -> Option<String> {
    let name = pick_str(raw, &["name"]);
    if let Some(name) = name.as_deref() {
        if name.starts_with("t1_") || name.starts_with("t3_") {
            return Some(name.to_string());
        }
    }

    let id = pick_str(raw, &["id"]).or(name)?;
    let is_comment = ["body", "link_id", "parent_id"]
        .iter()
        .any(|key| raw.get(*key).is_some_and(|v| !v.is_null()));
    Some(format!("{}_{id}", if is_comment { "t1" } else { "t3" }))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
