//! Raw Polymarket record normalization
//!
//! The CLOB and Gamma APIs describe the same market with different field
//! names: `condition_id` vs `id`, `tokens[].token_id` vs a JSON-encoded
//! `clobTokenIds` string, `end_date_iso` vs `endDate`. Normalization accepts
//! both shapes so discovery can be pointed at either endpoint.

use super::{Market, PricePoint, UserPosition};
use crate::collector::CollectError;
use crate::fields::{pick, pick_bool, pick_decimal, pick_str, string_list};
use crate::time;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeSet;

const ID_KEYS: &[&str] = &["id", "condition_id", "conditionId", "slug"];
const TITLE_KEYS: &[&str] = &["question", "title"];
const DESCRIPTION_KEYS: &[&str] = &["description", "subtitle"];
const END_KEYS: &[&str] = &["end_date_iso", "endDate", "end_date", "endDateIso"];
const CREATED_KEYS: &[&str] = &[
    "createdAt",
    "created_at",
    "created_at_iso",
    "startDate",
    "accepting_order_timestamp",
];
const RESOLUTION_KEYS: &[&str] = &[
    "resolutionRules",
    "resolution_criteria",
    "resolutionSource",
    "resolution_source",
];
const VOLUME_KEYS: &[&str] = &["volume", "volumeNum", "volumeClob", "usdcSize", "totalVolume"];

/// Normalize a raw market record from either API shape
pub fn normalize_market(raw: &Value) -> Result<Market, CollectError> {
    if !raw.is_object() {
        return Err(CollectError::MalformedRecord(
            "market record is not an object".to_string(),
        ));
    }

    let id = pick_str(raw, ID_KEYS)
        .ok_or_else(|| CollectError::MalformedRecord("market record has no id".to_string()))?;

    let end_date = pick(raw, END_KEYS).and_then(time::parse_value);
    let created_at = pick(raw, CREATED_KEYS).and_then(time::parse_value);

    Ok(Market {
        id,
        title: pick_str(raw, TITLE_KEYS).unwrap_or_default(),
        description: pick_str(raw, DESCRIPTION_KEYS).unwrap_or_default(),
        tags: parse_tags(raw.get("tags")),
        end_date,
        created_at,
        resolution_criteria: pick_str(raw, RESOLUTION_KEYS).unwrap_or_default(),
        clob_token_ids: parse_token_ids(raw),
        closed: pick_bool(raw, &["closed", "resolved", "isResolved"]),
        volume: pick_decimal(raw, VOLUME_KEYS).filter(|v| *v > Decimal::ZERO),
        slug: pick_str(raw, &["market_slug", "slug"]),
        price_history: Vec::new(),
    })
}

/// Parse CLOB token ids
///
/// CLOB shape: `tokens: [{"token_id": "...", "outcome": "Yes"}, ...]`.
/// Gamma shape: `clobTokenIds: "[\"yes\", \"no\"]"`. The first id is YES.
fn parse_token_ids(raw: &Value) -> Vec<String> {
    if let Some(Value::Array(tokens)) = raw.get("tokens") {
        let ids: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Value::Object(_) => pick_str(t, &["token_id", "id"]),
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .collect();
        if !ids.is_empty() {
            return ids;
        }
    }

    raw.get("clobTokenIds")
        .or_else(|| raw.get("clob_token_ids"))
        .map(string_list)
        .unwrap_or_default()
}

/// Tags arrive as plain strings or as `{"label": ..., "slug": ...}` objects
fn parse_tags(value: Option<&Value>) -> BTreeSet<String> {
    let Some(Value::Array(items)) = value else {
        return BTreeSet::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(_) => pick_str(item, &["label", "name", "slug"]),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Normalize one `{"t": <unix secs>, "p": <price>}` history point
pub fn normalize_price_point(raw: &Value) -> Result<PricePoint, CollectError> {
    let timestamp = pick(raw, &["t", "timestamp"])
        .and_then(time::parse_value)
        .ok_or_else(|| CollectError::MalformedRecord(format!("price point without time: {raw}")))?;

    let price = pick_decimal(raw, &["p", "price"])
        .ok_or_else(|| CollectError::MalformedRecord(format!("price point without price: {raw}")))?;

    if price < Decimal::ZERO || price > Decimal::ONE {
        return Err(CollectError::MalformedRecord(format!(
            "price {price} outside [0, 1]"
        )));
    }

    Ok(PricePoint::new(timestamp, price))
}

/// Normalize a Data API position record
pub fn normalize_position(raw: &Value) -> Result<UserPosition, CollectError> {
    let asset = pick_str(raw, &["asset", "asset_id", "token_id"])
        .ok_or_else(|| CollectError::MalformedRecord("position has no asset".to_string()))?;

    Ok(UserPosition {
        proxy_wallet: pick_str(raw, &["proxyWallet", "proxy_wallet", "user"]).unwrap_or_default(),
        asset,
        condition_id: pick_str(raw, &["conditionId", "condition_id"]).unwrap_or_default(),
        title: pick_str(raw, &["title", "question"]).unwrap_or_default(),
        outcome: pick_str(raw, &["outcome"]).unwrap_or_default(),
        size: pick_decimal(raw, &["size"]).unwrap_or_default(),
        avg_price: pick_decimal(raw, &["avgPrice", "avg_price"]).unwrap_or_default(),
        current_value: pick_decimal(raw, &["currentValue", "current_value"]).unwrap_or_default(),
        realized_pnl: pick_decimal(raw, &["realizedPnl", "realized_pnl"]).unwrap_or_default(),
    })
}
