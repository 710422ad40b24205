//! Market quality filter
//!
//! Drops markets that cannot anchor a social collection: no CLOB tokens, no
//! question text, too little volume, or too short a trading life.

use super::Market;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;

/// Why a market was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rejection {
    NoClobTokens,
    NoQuestion,
    LowVolume,
    TooNew,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rejection::NoClobTokens => "no_clob_tokens",
            Rejection::NoQuestion => "no_question_or_description",
            Rejection::LowVolume => "volume_too_low",
            Rejection::TooNew => "too_new",
        };
        f.write_str(s)
    }
}

/// Quality thresholds applied during discovery
#[derive(Debug, Clone)]
pub struct MarketFilter {
    /// Minimum USD volume; markets without a reported volume pass when zero
    pub min_volume: Decimal,
    /// Minimum days between creation and min(now, end date)
    pub min_active_days: f64,
}

impl Default for MarketFilter {
    fn default() -> Self {
        Self {
            min_volume: Decimal::ZERO,
            min_active_days: 0.0,
        }
    }
}

impl MarketFilter {
    /// Check a market against the thresholds
    pub fn check(&self, market: &Market, now: DateTime<Utc>) -> Result<(), Rejection> {
        if market.clob_token_ids.is_empty() {
            return Err(Rejection::NoClobTokens);
        }

        if market.title.trim().is_empty() && market.description.trim().is_empty() {
            return Err(Rejection::NoQuestion);
        }

        if self.min_volume > Decimal::ZERO
            && market.volume.unwrap_or(Decimal::ZERO) < self.min_volume
        {
            return Err(Rejection::LowVolume);
        }

        if self.min_active_days > 0.0 {
            if let Some(start) = market.created_at {
                let reference = market.end_date.map_or(now, |end| end.min(now));
                let active_days = (reference - start).num_seconds().max(0) as f64 / 86_400.0;
                if active_days < self.min_active_days {
                    return Err(Rejection::TooNew);
                }
            }
        }

        Ok(())
    }
}

/// Rejection counters reported at the end of discovery
#[derive(Debug, Default, Clone)]
pub struct FilterStats {
    pub accepted: usize,
    pub rejected: BTreeMap<Rejection, usize>,
}

impl FilterStats {
    pub fn record(&mut self, outcome: Result<(), Rejection>) {
        match outcome {
            Ok(()) => self.accepted += 1,
            Err(reason) => *self.rejected.entry(reason).or_default() += 1,
        }
    }

    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }
}
