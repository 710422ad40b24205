//! Twitter/X collector
//!
//! Offline datasets (JSON lines, JSON arrays, CSV; optionally compressed) or
//! the v2 search API with a bearer token and `next_token` pagination.

use super::dump::DumpSet;
use super::http::HttpClient;
use super::types::{
    inline_hashtags, Checkpoint, CollectError, Cursor, Page, SocialPost, SocialScope, SourceKind,
};
use super::SourceCollector;
use crate::fields::{pick, pick_str, pick_u64, string_list};
use crate::time;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// v2 API base URL
pub const TWITTER_API_URL: &str = "https://api.twitter.com/2";

/// Terms OR-ed into one search query (v2 queries are capped at 512 chars)
const MAX_QUERY_TERMS: usize = 8;

/// How far back `/tweets/search/recent` reaches
const RECENT_SEARCH_DAYS: i64 = 7;

/// Live API settings
#[derive(Debug, Clone)]
pub struct TwitterApiConfig {
    pub bearer_token: String,
    pub base_url: String,
    /// Use `/tweets/search/all` instead of the 7-day recent search
    pub full_archive: bool,
}

impl TwitterApiConfig {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            base_url: TWITTER_API_URL.to_string(),
            full_archive: false,
        }
    }
}

/// Live v2 API access
pub struct TwitterApi {
    config: TwitterApiConfig,
    http: HttpClient,
}

impl TwitterApi {
    pub fn new(config: TwitterApiConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    async fn search(
        &self,
        scope: &SocialScope,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, CollectError> {
        let next_token = match cursor {
            Cursor::Start => None,
            Cursor::Token { token } => Some(token.clone()),
            _ => {
                return Err(CollectError::ResumeMismatch(format!(
                    "cursor {cursor:?} is not a Twitter pagination token"
                )))
            }
        };

        let endpoint = if self.config.full_archive { "all" } else { "recent" };
        let url = format!("{}/tweets/search/{endpoint}", self.config.base_url);

        let Some((start, end)) = search_range(scope, Utc::now(), self.config.full_archive) else {
            tracing::debug!(market_id = %scope.market_id, "No window inside the searchable range");
            return Ok(Page::last(Vec::new()));
        };

        let mut query = vec![
            (
                "query",
                format!("({}) -is:retweet", scope.query.search_query(MAX_QUERY_TERMS)),
            ),
            ("max_results", page_size.clamp(10, 100).to_string()),
            ("start_time", start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            ("end_time", end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            (
                "tweet.fields",
                "created_at,public_metrics,entities,author_id".to_string(),
            ),
            ("expansions", "author_id".to_string()),
            ("user.fields", "username".to_string()),
        ];
        if let Some(token) = next_token {
            query.push(("next_token", token));
        }

        let request = self
            .http
            .client()
            .get(&url)
            .query(&query)
            .bearer_auth(&self.config.bearer_token);
        let body = self.http.send(request, &url).await?;
        Ok(parse_search_page(body))
    }
}

/// Envelope of the searchable windows, with the end pulled back from "now" as
/// the API requires
///
/// Recent search only reaches back [`RECENT_SEARCH_DAYS`]; windows that end
/// before that are dropped and the start is clamped to the limit.
fn search_range(
    scope: &SocialScope,
    now: DateTime<Utc>,
    full_archive: bool,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let cutoff = now - Duration::seconds(30);
    let floor = if full_archive {
        DateTime::<Utc>::MIN_UTC
    } else {
        now - Duration::days(RECENT_SEARCH_DAYS) + Duration::minutes(1)
    };

    let (start, end) = scope
        .windows
        .all()
        .filter(|w| w.end > floor && w.start < cutoff)
        .fold(None, |range: Option<(DateTime<Utc>, DateTime<Utc>)>, w| {
            let (s, e) = range.unwrap_or((w.start, w.end));
            Some((s.min(w.start), e.max(w.end)))
        })?;
    let (start, end) = (start.max(floor), end.min(cutoff));
    (start < end).then_some((start, end))
}

/// Flatten a v2 search response, attaching usernames from `includes.users`
fn parse_search_page(body: Value) -> Page {
    let users: HashMap<String, String> = body
        .pointer("/includes/users")
        .and_then(Value::as_array)
        .map(|users| {
            users
                .iter()
                .filter_map(|u| Some((pick_str(u, &["id"])?, pick_str(u, &["username"])?)))
                .collect()
        })
        .unwrap_or_default();

    let records = match body.get("data") {
        Some(Value::Array(tweets)) => tweets
            .iter()
            .cloned()
            .map(|mut tweet| {
                let author = pick_str(&tweet, &["author_id"]).and_then(|id| users.get(&id).cloned());
                if let (Some(username), Value::Object(obj)) = (author, &mut tweet) {
                    obj.insert("username".to_string(), Value::String(username));
                }
                tweet
            })
            .collect(),
        _ => Vec::new(),
    };

    let next = body
        .pointer("/meta/next_token")
        .and_then(Value::as_str)
        .map(|token| Cursor::Token {
            token: token.to_string(),
        });

    Page::new(records, next)
}

/// Where tweets come from
pub enum TwitterBackend {
    Dataset(DumpSet),
    Api(TwitterApi),
}

/// Collector for tweets
pub struct TwitterCollector {
    backend: TwitterBackend,
    page_size: usize,
}

impl TwitterCollector {
    /// Create a new collector
    pub fn new(backend: TwitterBackend, page_size: usize) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
        }
    }

    fn backend_id(&self) -> String {
        match &self.backend {
            TwitterBackend::Dataset(dump) => dump.fingerprint(),
            TwitterBackend::Api(api) if api.config.full_archive => "api:all".to_string(),
            TwitterBackend::Api(_) => "api:recent".to_string(),
        }
    }
}

#[async_trait]
impl SourceCollector for TwitterCollector {
    type Scope = SocialScope;
    type Record = SocialPost;

    fn source(&self) -> SourceKind {
        SourceKind::Twitter
    }

    async fn discover(&self) -> Result<Vec<SocialScope>, CollectError> {
        Ok(Vec::new())
    }

    async fn fetch_page(&self, scope: &SocialScope, cursor: &Cursor) -> Result<Page, CollectError> {
        match &self.backend {
            TwitterBackend::Dataset(dump) => dump.read_page(cursor, self.page_size).await,
            TwitterBackend::Api(api) => api.search(scope, cursor, self.page_size).await,
        }
    }

    fn normalize(&self, scope: &SocialScope, raw: &Value) -> Result<SocialPost, CollectError> {
        normalize_tweet(&scope.market_id, raw)
    }

    fn retain(&self, scope: &SocialScope, post: &SocialPost) -> bool {
        scope.admits(post)
    }

    fn fingerprint(&self, scope: &SocialScope) -> String {
        format!("twitter:{}:{}", self.backend_id(), scope.fingerprint())
    }

    fn validate_resume(&self, scope: &SocialScope, checkpoint: &Checkpoint) -> Result<(), CollectError> {
        let expected = self.fingerprint(scope);
        if checkpoint.source != SourceKind::Twitter || checkpoint.fingerprint != expected {
            return Err(CollectError::ResumeMismatch(format!(
                "checkpoint {} does not match {}",
                checkpoint.fingerprint, expected
            )));
        }
        match (&self.backend, &checkpoint.cursor) {
            (TwitterBackend::Dataset(dump), Cursor::Dump(pos)) => dump.validate(pos),
            (TwitterBackend::Dataset(_), Cursor::Start) => Ok(()),
            (TwitterBackend::Api(_), Cursor::Start | Cursor::Token { .. }) => Ok(()),
            (_, cursor) => Err(CollectError::ResumeMismatch(format!(
                "cursor {cursor:?} does not fit the configured Twitter backend"
            ))),
        }
    }
}

const TEXT_KEYS: &[&str] = &["full_text", "text", "tweet", "content", "rawContent"];
const ID_KEYS: &[&str] = &["id_str", "id", "tweet_id", "tweetId"];
const TIME_KEYS: &[&str] = &["created_at", "timestamp", "date", "datetime"];
const AUTHOR_KEYS: &[&str] = &["username", "screen_name", "user_name", "author", "author_id"];

/// (metric, keys) for flat engagement counts
const FLAT_METRICS: &[(&str, &[&str])] = &[
    ("retweet_count", &["retweet_count", "retweets", "retweets_count"]),
    ("like_count", &["favorite_count", "likes", "like_count", "likes_count"]),
    ("reply_count", &["reply_count", "replies", "replies_count"]),
    ("quote_count", &["quote_count", "quotes"]),
];

/// Normalize a tweet from v1.1, v2 or a flat dataset row
pub fn normalize_tweet(market_id: &str, raw: &Value) -> Result<SocialPost, CollectError> {
    if !raw.is_object() {
        return Err(CollectError::MalformedRecord(
            "tweet record is not an object".to_string(),
        ));
    }

    let post_id = pick_str(raw, ID_KEYS)
        .ok_or_else(|| CollectError::MalformedRecord("tweet has no id".to_string()))?;

    let text = pick_str(raw, TEXT_KEYS)
        .ok_or_else(|| CollectError::MalformedRecord(format!("tweet {post_id} has no text")))?;

    let timestamp = pick(raw, TIME_KEYS)
        .and_then(time::parse_value)
        .ok_or_else(|| CollectError::MalformedRecord(format!("tweet {post_id} has no timestamp")))?;

    let author = raw
        .get("user")
        .filter(|u| u.is_object())
        .and_then(|u| pick_str(u, &["screen_name", "username", "name"]))
        .or_else(|| pick_str(raw, AUTHOR_KEYS))
        .unwrap_or_default();

    let mut engagement = BTreeMap::new();
    if let Some(metrics) = raw.get("public_metrics").filter(|m| m.is_object()) {
        for (metric, _) in FLAT_METRICS {
            if let Some(count) = pick_u64(metrics, &[*metric]) {
                engagement.insert(metric.to_string(), count);
            }
        }
    } else {
        for (metric, keys) in FLAT_METRICS {
            if let Some(count) = pick_u64(raw, keys) {
                engagement.insert(metric.to_string(), count);
            }
        }
    }

    let mut hashtags = explicit_hashtags(raw);
    for tag in inline_hashtags(&text) {
        if !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }

    Ok(SocialPost {
        source: SourceKind::Twitter,
        post_id,
        market_id: market_id.to_string(),
        author,
        timestamp,
        text,
        channel: None,
        hashtags,
        engagement,
    })
}

/// Hashtags from `entities.hashtags` (`text` in v1.1, `tag` in v2) or a flat field
fn explicit_hashtags(raw: &Value) -> Vec<String> {
    let tags: Vec<String> = match raw.pointer("/entities/hashtags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|h| pick_str(h, &["text", "tag"]))
            .collect(),
        // datasets store lists as "a,b", JSON arrays or Python reprs like "['a', 'b']"
        _ => match raw.get("hashtags") {
            Some(Value::String(s)) => s
                .trim()
                .trim_matches(['[', ']'])
                .split([',', ' '])
                .map(|t| t.trim_matches(['\'', '"']).to_string())
                .collect(),
            Some(value) => string_list(value),
            None => Vec::new(),
        },
    };

    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
