//! Collection window types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of collection window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Creation to resolution
    Market,
    /// Neighbourhood of a large price move
    Shock,
}

/// A half-open interval `[start, end)` scoped to one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionWindow {
    pub market_id: String,
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CollectionWindow {
    pub fn new(
        market_id: impl Into<String>,
        kind: WindowKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            kind,
            start,
            end,
        }
    }

    /// Whether `ts` lies in the window
    ///
    /// A degraded window with `start == end` contains exactly its start.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        if self.start == self.end {
            return ts == self.start;
        }
        self.start <= ts && ts < self.end
    }

    pub fn is_degraded(&self) -> bool {
        self.start == self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Shock detection and market window parameters
#[derive(Debug, Clone)]
pub struct WindowParams {
    /// Minimum |Δprice| over the lookback to count as a shock
    pub threshold: Decimal,
    /// Lookback in price observations
    pub lookback: usize,
    /// Half-width of each shock window
    pub padding: Duration,
    /// Extension of the market window before creation
    pub lead: Duration,
    /// Extension of the market window after resolution
    pub lag: Duration,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            threshold: Decimal::new(10, 2), // 0.10
            lookback: 1,
            padding: Duration::hours(24),
            lead: Duration::zero(),
            lag: Duration::zero(),
        }
    }
}

/// Windows derived for a single market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketWindows {
    pub market: CollectionWindow,
    pub shocks: Vec<CollectionWindow>,
    /// Non-fatal problems found while deriving the windows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MarketWindows {
    /// All windows, market window first
    pub fn all(&self) -> impl Iterator<Item = &CollectionWindow> {
        std::iter::once(&self.market).chain(self.shocks.iter())
    }

    /// Whether `ts` lies in any window of the market
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.all().any(|w| w.contains(ts))
    }

    /// Earliest start and latest end over all windows
    pub fn envelope(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.all().fold((self.market.start, self.market.end), |(lo, hi), w| {
            (lo.min(w.start), hi.max(w.end))
        })
    }
}

/// Window derivation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// No creation date, price history or end date to anchor a window
    #[error("Market {0} has no temporal anchor")]
    NoAnchor(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_contains_is_half_open() {
        let w = CollectionWindow::new("m", WindowKind::Market, at(10), at(20));
        assert!(w.contains(at(10)));
        assert!(w.contains(at(19)));
        assert!(!w.contains(at(20)));
        assert!(!w.contains(at(9)));
    }

    #[test]
    fn test_degraded_window_contains_its_start() {
        let w = CollectionWindow::new("m", WindowKind::Market, at(10), at(10));
        assert!(w.is_degraded());
        assert!(w.contains(at(10)));
        assert!(!w.contains(at(11)));
    }

    #[test]
    fn test_envelope_and_contains() {
        let windows = MarketWindows {
            market: CollectionWindow::new("m", WindowKind::Market, at(10), at(100)),
            shocks: vec![CollectionWindow::new("m", WindowKind::Shock, at(40), at(60))],
            warnings: vec![],
        };
        assert_eq!(windows.envelope(), (at(10), at(100)));
        assert!(windows.contains(at(50)));
        assert!(!windows.contains(at(100)));
        assert_eq!(windows.all().count(), 2);
    }

    #[test]
    fn test_window_kind_serde() {
        let json = serde_json::to_string(&WindowKind::Shock).unwrap();
        assert_eq!(json, "\"shock\"");
    }
}
