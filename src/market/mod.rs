//! Market domain module
//!
//! Polymarket markets, their YES-token price history and user positions,
//! plus normalization of raw API records into these types.

mod filter;
mod gamma;

pub use filter::{FilterStats, MarketFilter, Rejection};
pub use gamma::{normalize_market, normalize_position, normalize_price_point};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A Polymarket market as persisted in `markets.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Unique market identifier (re-fetch overwrites by id)
    pub id: String,
    /// Market question
    pub title: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    /// Resolution / end date, when the source provides one
    pub end_date: Option<DateTime<Utc>>,
    /// Creation timestamp, anchor of the market window
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub resolution_criteria: String,
    /// CLOB token ids; the first entry is the YES token
    pub clob_token_ids: Vec<String>,
    /// Whether the market has closed/resolved
    #[serde(default)]
    pub closed: bool,
    /// USD volume, when reported
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub slug: Option<String>,
    /// YES-token price history, chronological
    #[serde(default)]
    pub price_history: Vec<PricePoint>,
}

impl Market {
    /// The canonical YES token, if the market has any CLOB tokens
    pub fn yes_token(&self) -> Option<&str> {
        self.clob_token_ids.first().map(String::as_str)
    }

    /// Earliest known instant of the market's life
    pub fn creation(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .or_else(|| self.price_history.first().map(|p| p.timestamp))
    }

    /// Replace the price history, restoring chronological order and
    /// dropping repeated timestamps (chunk boundaries can overlap)
    pub fn set_price_history(&mut self, mut points: Vec<PricePoint>) {
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        self.price_history = points;
    }
}

/// Deduplicate markets by id
///
/// A later copy replaces the earlier one but keeps its position, so listing
/// order is stable across overlapping pages. `cap` truncates the result.
pub fn dedup_by_id(markets: impl IntoIterator<Item = Market>, cap: Option<usize>) -> Vec<Market> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Market> = Vec::new();
    for market in markets {
        match index.get(&market.id) {
            Some(&i) => out[i] = market,
            None => {
                index.insert(market.id.clone(), out.len());
                out.push(market);
            }
        }
    }
    if let Some(cap) = cap {
        out.truncate(cap);
    }
    out
}

/// A single (timestamp, price) observation of the YES token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    /// Probability-like price in [0, 1]
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self { timestamp, price }
    }
}

/// One line of `prices_history.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryRow {
    pub market_id: String,
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl PriceHistoryRow {
    /// Flatten a market's history into output rows
    pub fn from_market(market: &Market) -> Vec<Self> {
        let token_id = market.yes_token().unwrap_or_default().to_string();
        market
            .price_history
            .iter()
            .map(|p| Self {
                market_id: market.id.clone(),
                token_id: token_id.clone(),
                timestamp: p.timestamp,
                price: p.price,
            })
            .collect()
    }
}

/// A position held by a single user address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPosition {
    pub proxy_wallet: String,
    /// Token id the position is held in
    pub asset: String,
    pub condition_id: String,
    pub title: String,
    pub outcome: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub size: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub avg_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub realized_pnl: Decimal,
}
