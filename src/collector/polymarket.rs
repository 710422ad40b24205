//! Polymarket collector
//!
//! Market discovery from the CLOB `/markets` listing (or a Gamma-style
//! offset-paginated listing), YES-token price history from `/prices-history`,
//! and user positions from the Data API.

use super::http::HttpClient;
use super::types::{CollectError, Cursor, Page, SourceKind};
use super::{MarketCollector, SourceCollector};
use crate::market::{
    normalize_market, normalize_position, normalize_price_point, FilterStats, Market,
    MarketFilter, PricePoint, UserPosition,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

/// CLOB API base URL
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Data API base URL
pub const DATA_API_URL: &str = "https://data-api.polymarket.com";

/// `next_cursor` value marking the end of the CLOB listing
pub const END_CURSOR: &str = "LTE=";

/// Polymarket collector settings
#[derive(Debug, Clone)]
pub struct PolymarketConfig {
    pub base_url: String,
    pub data_api_url: String,
    /// Page size for offset-paginated endpoints
    pub page_size: usize,
    /// Candle width requested from `/prices-history`
    pub history_fidelity_minutes: u32,
    /// Split history requests into chunks of this many days (0 = one request)
    pub history_chunk_days: u32,
    /// Also fetch history for markets that have not closed
    pub fetch_history_for_open: bool,
    /// Histories shorter than this are discarded
    pub min_candles: usize,
    pub filter: MarketFilter,
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            base_url: CLOB_API_URL.to_string(),
            data_api_url: DATA_API_URL.to_string(),
            page_size: 100,
            history_fidelity_minutes: 720,
            history_chunk_days: 30,
            fetch_history_for_open: false,
            min_candles: 10,
            filter: MarketFilter::default(),
        }
    }
}

/// Units of Polymarket collection
#[derive(Debug, Clone, PartialEq)]
pub enum PolymarketScope {
    /// The market listing
    Markets,
    /// YES-token history of one market
    History {
        market_id: String,
        token_id: String,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// Open positions of one user
    Positions { address: String },
}

/// A normalized Polymarket record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolymarketRecord {
    Market(Market),
    Price(PricePoint),
    Position(UserPosition),
}

/// Collector for the Polymarket APIs
pub struct PolymarketCollector {
    config: PolymarketConfig,
    http: HttpClient,
    filter_stats: Mutex<FilterStats>,
}

impl PolymarketCollector {
    /// Create a new collector
    pub fn new(config: PolymarketConfig, http: HttpClient) -> Self {
        Self {
            config,
            http,
            filter_stats: Mutex::new(FilterStats::default()),
        }
    }

    pub fn config(&self) -> &PolymarketConfig {
        &self.config
    }

    /// Accept/reject counts of the market filter so far
    pub fn filter_stats(&self) -> FilterStats {
        self.filter_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// History scope for a market, `None` when no history should be fetched
    pub fn history_scope(&self, market: &Market) -> Option<PolymarketScope> {
        let token_id = market.yes_token()?;
        if !market.closed && !self.config.fetch_history_for_open {
            return None;
        }

        Some(PolymarketScope::History {
            market_id: market.id.clone(),
            token_id: token_id.to_string(),
            start: market.created_at,
            end: market.end_date,
        })
    }

    /// Attach collected history to a market, dropping histories that are too short
    pub fn attach_history(&self, market: &mut Market, points: Vec<PricePoint>) {
        if points.len() < self.config.min_candles {
            tracing::debug!(
                market_id = %market.id,
                candles = points.len(),
                min_candles = self.config.min_candles,
                "Price history too short, discarding"
            );
            market.set_price_history(Vec::new());
        } else {
            market.set_price_history(points);
        }
    }

    async fn fetch_markets(&self, cursor: &Cursor) -> Result<Page, CollectError> {
        let url = format!("{}/markets", self.config.base_url);
        let mut query: Vec<(&str, String)> = Vec::new();
        match cursor {
            Cursor::Start => {}
            Cursor::Token { token } => query.push(("next_cursor", token.clone())),
            Cursor::Offset { offset } => {
                query.push(("limit", self.config.page_size.to_string()));
                query.push(("offset", offset.to_string()));
            }
            Cursor::Dump(_) => return Err(unexpected_cursor(cursor)),
        }

        let body = self.http.get_json(&url, &query).await?;
        parse_markets_page(body, cursor, self.config.page_size)
    }

    async fn fetch_history(
        &self,
        token_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        cursor: &Cursor,
    ) -> Result<Page, CollectError> {
        let url = format!("{}/prices-history", self.config.base_url);
        let (query, next) = history_request(
            token_id,
            range,
            self.config.history_chunk_days,
            self.config.history_fidelity_minutes,
            cursor,
        )?;

        let body = self.http.get_json(&url, &query).await?;
        let records = match body.get("history") {
            Some(Value::Array(points)) => points.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(CollectError::Source(format!(
                    "unexpected history payload: {other}"
                )))
            }
        };
        Ok(Page::new(records, next))
    }

    async fn fetch_positions(&self, address: &str, cursor: &Cursor) -> Result<Page, CollectError> {
        let url = format!("{}/positions", self.config.data_api_url);
        let offset = match cursor {
            Cursor::Start => 0,
            Cursor::Offset { offset } => *offset,
            _ => return Err(unexpected_cursor(cursor)),
        };
        let query = [
            ("user", address.to_string()),
            ("limit", self.config.page_size.to_string()),
            ("offset", offset.to_string()),
        ];

        let body = self.http.get_json(&url, &query).await?;
        let Value::Array(records) = body else {
            return Err(CollectError::Source(
                "positions response is not an array".to_string(),
            ));
        };

        let next = (records.len() >= self.config.page_size).then(|| Cursor::Offset {
            offset: offset + records.len() as u64,
        });
        Ok(Page::new(records, next))
    }
}

#[async_trait]
impl SourceCollector for PolymarketCollector {
    type Scope = PolymarketScope;
    type Record = PolymarketRecord;

    fn source(&self) -> SourceKind {
        SourceKind::Polymarket
    }

    async fn discover(&self) -> Result<Vec<PolymarketScope>, CollectError> {
        Ok(vec![PolymarketScope::Markets])
    }

    async fn fetch_page(&self, scope: &PolymarketScope, cursor: &Cursor) -> Result<Page, CollectError> {
        match scope {
            PolymarketScope::Markets => self.fetch_markets(cursor).await,
            PolymarketScope::History {
                token_id,
                start,
                end,
                ..
            } => {
                // Clamped per request; the fingerprint keeps the raw end date
                let end = end.map(|e| e.min(Utc::now()));
                let range = start.zip(end).filter(|(s, e)| s < e);
                self.fetch_history(token_id, range, cursor).await
            }
            PolymarketScope::Positions { address } => self.fetch_positions(address, cursor).await,
        }
    }

    fn normalize(&self, scope: &PolymarketScope, raw: &Value) -> Result<PolymarketRecord, CollectError> {
        match scope {
            PolymarketScope::Markets => normalize_market(raw).map(PolymarketRecord::Market),
            PolymarketScope::History { .. } => normalize_price_point(raw).map(PolymarketRecord::Price),
            PolymarketScope::Positions { .. } => {
                normalize_position(raw).map(PolymarketRecord::Position)
            }
        }
    }

    fn retain(&self, _scope: &PolymarketScope, record: &PolymarketRecord) -> bool {
        let PolymarketRecord::Market(market) = record else {
            return true;
        };

        let outcome = self.config.filter.check(market, Utc::now());
        if let Err(reason) = outcome {
            tracing::trace!(market_id = %market.id, reason = %reason, "Market rejected");
        }
        self.filter_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(outcome);
        outcome.is_ok()
    }

    fn fingerprint(&self, scope: &PolymarketScope) -> String {
        match scope {
            PolymarketScope::Markets => format!("polymarket:markets:{}", self.config.base_url),
            PolymarketScope::History {
                token_id,
                start,
                end,
                ..
            } => format!(
                "polymarket:history:{}:{}:{}:{}",
                token_id,
                start.map_or(0, |t| t.timestamp()),
                end.map_or(0, |t| t.timestamp()),
                self.config.history_chunk_days
            ),
            PolymarketScope::Positions { address } => {
                format!("polymarket:positions:{}", address.to_lowercase())
            }
        }
    }
}

impl MarketCollector for PolymarketCollector {
    fn history_scope(&self, market: &Market) -> Option<PolymarketScope> {
        PolymarketCollector::history_scope(self, market)
    }

    fn attach_history(&self, market: &mut Market, points: Vec<PricePoint>) {
        PolymarketCollector::attach_history(self, market, points)
    }

    fn filter_stats(&self) -> FilterStats {
        PolymarketCollector::filter_stats(self)
    }
}

fn unexpected_cursor(cursor: &Cursor) -> CollectError {
    CollectError::ResumeMismatch(format!("cursor {cursor:?} does not apply to this endpoint"))
}

/// Split a CLOB (`{data, next_cursor}`) or Gamma (bare array) listing page
fn parse_markets_page(body: Value, cursor: &Cursor, page_size: usize) -> Result<Page, CollectError> {
    match body {
        Value::Object(mut obj) => {
            let records = match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(CollectError::Source(
                        "markets response has no data array".to_string(),
                    ))
                }
            };
            let next = obj
                .get("next_cursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty() && *c != END_CURSOR)
                .map(|token| Cursor::Token {
                    token: token.to_string(),
                });
            Ok(Page::new(records, next))
        }
        Value::Array(records) => {
            let offset = match cursor {
                Cursor::Offset { offset } => *offset,
                _ => 0,
            };
            let next = (records.len() >= page_size).then(|| Cursor::Offset {
                offset: offset + records.len() as u64,
            });
            Ok(Page::new(records, next))
        }
        other => Err(CollectError::Source(format!(
            "unexpected markets payload: {other}"
        ))),
    }
}

/// Query parameters for one history request and the cursor after it
///
/// With a known range and a positive chunk size the range is walked in
/// chunks, the cursor offset being the chunk index; otherwise a single
/// `interval=max` request covers the whole life of the token.
fn history_request(
    token_id: &str,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    chunk_days: u32,
    fidelity_minutes: u32,
    cursor: &Cursor,
) -> Result<(Vec<(&'static str, String)>, Option<Cursor>), CollectError> {
    let chunk_index = match cursor {
        Cursor::Start => 0,
        Cursor::Offset { offset } => *offset,
        _ => return Err(unexpected_cursor(cursor)),
    };

    let mut query = vec![
        ("market", token_id.to_string()),
        ("fidelity", fidelity_minutes.to_string()),
    ];

    let Some((start, end)) = range.filter(|_| chunk_days > 0) else {
        query.push(("interval", "max".to_string()));
        return Ok((query, None));
    };

    let chunk = Duration::days(i64::from(chunk_days));
    let offset = i32::try_from(chunk_index)
        .map_err(|_| unexpected_cursor(cursor))?;
    let chunk_start = start + chunk * offset;
    let chunk_end = (chunk_start + chunk).min(end);

    query.push(("startTs", chunk_start.timestamp().to_string()));
    query.push(("endTs", chunk_end.timestamp().to_string()));

    let next = (chunk_end < end).then(|| Cursor::Offset {
        offset: chunk_index + 1,
    });
    Ok((query, next))
}
