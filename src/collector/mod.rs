//! Source collectors
//!
//! Every source exposes the same capability set through [`SourceCollector`]:
//! enumerate scopes, fetch a page from a cursor, normalize raw records, filter
//! them, and produce or validate checkpoints. The orchestrator drives any
//! collector through that trait, so dispatch is static per configured source.

pub mod dump;
pub mod http;
pub mod polymarket;
pub mod reddit;
pub mod twitter;
mod types;

pub use dump::DumpSet;
pub use http::HttpClient;
pub use polymarket::{PolymarketCollector, PolymarketConfig, PolymarketRecord, PolymarketScope};
pub use reddit::{RedditBackend, RedditCollector};
pub use twitter::{TwitterBackend, TwitterCollector};
pub use types::{
    inline_hashtags, Checkpoint, CollectError, Cursor, DumpPosition, Page, SocialPost,
    SocialScope, SourceKind,
};

use crate::market::{FilterStats, Market, PricePoint};
use async_trait::async_trait;
use serde_json::Value;

/// Capability set shared by all sources
#[async_trait]
pub trait SourceCollector: Send + Sync {
    /// Unit of collection (market listing, one market's history, one market's posts)
    type Scope: Send + Sync;
    /// Normalized record type
    type Record: Send;

    fn source(&self) -> SourceKind;

    /// Scopes the collector can enumerate on its own
    async fn discover(&self) -> Result<Vec<Self::Scope>, CollectError>;

    /// Fetch the page starting at `cursor`
    ///
    /// Any cursor previously returned in [`Page::next`] is a valid argument.
    async fn fetch_page(&self, scope: &Self::Scope, cursor: &Cursor) -> Result<Page, CollectError>;

    /// Convert a raw record, or fail with [`CollectError::MalformedRecord`]
    fn normalize(&self, scope: &Self::Scope, raw: &Value) -> Result<Self::Record, CollectError>;

    /// Whether a normalized record belongs in the output
    fn retain(&self, _scope: &Self::Scope, _record: &Self::Record) -> bool {
        true
    }

    /// Stable identity of a scope, stored with each checkpoint
    fn fingerprint(&self, scope: &Self::Scope) -> String;

    fn checkpoint(&self, scope: &Self::Scope, cursor: &Cursor) -> Checkpoint {
        Checkpoint::new(self.source(), self.fingerprint(scope), cursor.clone())
    }

    /// Check that a stored checkpoint can resume `scope`
    fn validate_resume(
        &self,
        scope: &Self::Scope,
        checkpoint: &Checkpoint,
    ) -> Result<(), CollectError> {
        if checkpoint.source != self.source() {
            return Err(CollectError::ResumeMismatch(format!(
                "checkpoint belongs to {}, not {}",
                checkpoint.source,
                self.source()
            )));
        }
        let expected = self.fingerprint(scope);
        if checkpoint.fingerprint != expected {
            return Err(CollectError::ResumeMismatch(format!(
                "checkpoint fingerprint {} does not match {}",
                checkpoint.fingerprint, expected
            )));
        }
        Ok(())
    }
}

/// Market-level hooks of the market data source
pub trait MarketCollector:
    SourceCollector<Scope = PolymarketScope, Record = PolymarketRecord>
{
    /// Scope of the market's price history, `None` to skip it
    fn history_scope(&self, market: &Market) -> Option<PolymarketScope>;

    /// Store collected history on the market
    fn attach_history(&self, market: &mut Market, points: Vec<PricePoint>) {
        market.set_price_history(points);
    }

    /// Discovery filter counts
    fn filter_stats(&self) -> FilterStats {
        FilterStats::default()
    }
}

/// A collector of posts about one market
pub trait SocialCollector: SourceCollector<Scope = SocialScope, Record = SocialPost> {}

impl<T> SocialCollector for T where T: SourceCollector<Scope = SocialScope, Record = SocialPost> {}
