//! Per-market social CSV output

use super::writer::write_atomic;
use crate::collector::{SocialPost, SourceKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::Path;

/// Column order of the social CSV files
pub const SOCIAL_COLUMNS: [&str; 9] = [
    "source",
    "post_id",
    "market_id",
    "author",
    "timestamp",
    "channel",
    "hashtags",
    "engagement",
    "text",
];

/// Flat CSV form of a [`SocialPost`]
///
/// Hashtags are space separated and engagement is a JSON object, since CSV
/// cells cannot nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialRow {
    pub source: String,
    pub post_id: String,
    pub market_id: String,
    pub author: String,
    pub timestamp: String,
    pub channel: String,
    pub hashtags: String,
    pub engagement: String,
    pub text: String,
}

impl From<&SocialPost> for SocialRow {
    fn from(post: &SocialPost) -> Self {
        Self {
            source: post.source.to_string(),
            post_id: post.post_id.clone(),
            market_id: post.market_id.clone(),
            author: post.author.clone(),
            timestamp: post.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            channel: post.channel.clone().unwrap_or_default(),
            hashtags: post.hashtags.join(" "),
            engagement: serde_json::to_string(&post.engagement).unwrap_or_default(),
            text: post.text.clone(),
        }
    }
}

impl SocialRow {
    /// Parse a row back into a post
    pub fn into_post(self) -> io::Result<SocialPost> {
        let invalid = |what: &str| io::Error::new(io::ErrorKind::InvalidData, what.to_string());
        let source: SourceKind = self
            .source
            .parse()
            .map_err(|_| invalid("unknown source"))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|_| invalid("bad timestamp"))?
            .with_timezone(&Utc);
        let engagement: BTreeMap<String, u64> = if self.engagement.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&self.engagement)?
        };

        Ok(SocialPost {
            source,
            post_id: self.post_id,
            market_id: self.market_id,
            author: self.author,
            timestamp,
            text: self.text,
            channel: (!self.channel.is_empty()).then_some(self.channel),
            hashtags: self.hashtags.split_whitespace().map(str::to_string).collect(),
            engagement,
        })
    }
}

/// Drop repeated `(source, post_id)` keys, keeping the first occurrence
pub fn dedup_posts(posts: Vec<SocialPost>) -> Vec<SocialPost> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|p| seen.insert((p.source, p.post_id.clone())))
        .collect()
}

/// Write a market's posts atomically; returns the number of rows
pub fn write_social_csv(path: &Path, posts: &[SocialPost]) -> io::Result<usize> {
    write_atomic(path, |w| {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut *w);
        csv.write_record(SOCIAL_COLUMNS)?;
        for post in posts {
            csv.serialize(SocialRow::from(post))?;
        }
        csv.flush()
    })?;
    Ok(posts.len())
}

/// Read a social CSV written by [`write_social_csv`]
pub fn read_social_csv(path: &Path) -> io::Result<Vec<SocialPost>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize::<SocialRow>()
        .map(|row| row.map_err(io::Error::from).and_then(SocialRow::into_post))
        .collect()
}
