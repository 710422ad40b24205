//! Window calculator
//!
//! Derives the market window and the shock windows of a market from its
//! metadata and YES-token price history. The derivation is a pure function of
//! the market and the parameters, so a resumed run rebuilds exactly the
//! windows the interrupted run collected against.

use super::types::{CollectionWindow, MarketWindows, WindowError, WindowKind, WindowParams};
use crate::market::{Market, PricePoint};
use chrono::{DateTime, Duration, Utc};

/// Computes collection windows from market metadata
#[derive(Debug, Clone, Default)]
pub struct WindowCalculator {
    params: WindowParams,
}

impl WindowCalculator {
    /// Create a calculator with the given parameters
    pub fn new(params: WindowParams) -> Self {
        Self { params }
    }

    /// Create a calculator with default parameters
    pub fn with_defaults() -> Self {
        Self::new(WindowParams::default())
    }

    pub fn params(&self) -> &WindowParams {
        &self.params
    }

    /// Compute all windows for a market
    pub fn compute(&self, market: &Market) -> Result<MarketWindows, WindowError> {
        let mut points = market.price_history.clone();
        points.sort_by_key(|p| p.timestamp);

        let mut warnings = Vec::new();
        let market_window = self.market_window(market, &points, &mut warnings)?;
        let shocks = self.shock_windows(&market_window, &points);

        Ok(MarketWindows {
            market: market_window,
            shocks,
            warnings,
        })
    }

    fn market_window(
        &self,
        market: &Market,
        points: &[PricePoint],
        warnings: &mut Vec<String>,
    ) -> Result<CollectionWindow, WindowError> {
        let first_obs = points.first().map(|p| p.timestamp);
        let last_obs = points.last().map(|p| p.timestamp);

        let creation = match (market.created_at, first_obs) {
            (Some(c), Some(f)) => Some(c.min(f)),
            (c, f) => c.or(f),
        };

        let (start, end) = match (creation, market.end_date) {
            (None, None) => return Err(WindowError::NoAnchor(market.id.clone())),
            (None, Some(end)) => {
                warnings.push(format!(
                    "market {} has no creation date or price history; window degraded to its end date",
                    market.id
                ));
                (end, end)
            }
            (Some(start), Some(end_date)) => {
                // every observation must fall inside the half-open window
                let end = match last_obs {
                    Some(last) => end_date.max(last + Duration::seconds(1)),
                    None => end_date,
                };
                if end < start {
                    warnings.push(format!(
                        "market {} ends before it was created; window degraded to creation",
                        market.id
                    ));
                    (start, start)
                } else {
                    (start, end)
                }
            }
            (Some(start), None) => match last_obs {
                Some(last) => {
                    warnings.push(format!(
                        "market {} has no end date; window closes after the last price observation",
                        market.id
                    ));
                    (start, last + Duration::seconds(1))
                }
                None => {
                    warnings.push(format!(
                        "market {} has no end date and no price history; window degraded to creation",
                        market.id
                    ));
                    (start, start)
                }
            },
        };

        Ok(CollectionWindow::new(
            market.id.clone(),
            WindowKind::Market,
            shift_back(start, self.params.lead),
            shift_forward(end, self.params.lag),
        ))
    }

    /// Scan the history for |price[i] - price[i - L]| >= threshold and emit
    /// padded, clipped, merged shock windows
    fn shock_windows(
        &self,
        market_window: &CollectionWindow,
        points: &[PricePoint],
    ) -> Vec<CollectionWindow> {
        let lookback = self.params.lookback.max(1);
        if points.len() <= lookback {
            return Vec::new();
        }

        let padding = self.params.padding.max(Duration::seconds(1));
        let mut shocks: Vec<CollectionWindow> = Vec::new();

        for i in lookback..points.len() {
            let delta = (points[i].price - points[i - lookback].price).abs();
            if delta < self.params.threshold {
                continue;
            }

            let t = points[i].timestamp;
            let start = shift_back(t, padding).max(market_window.start);
            let end = shift_forward(t, padding).min(market_window.end);
            if start >= end {
                continue;
            }

            match shocks.last_mut() {
                Some(last) if start <= last.end => {
                    last.end = last.end.max(end);
                }
                _ => shocks.push(CollectionWindow::new(
                    market_window.market_id.clone(),
                    WindowKind::Shock,
                    start,
                    end,
                )),
            }
        }

        tracing::trace!(
            market_id = %market_window.market_id,
            shocks = shocks.len(),
            "Computed shock windows"
        );

        shocks
    }
}

/// `t - d`, saturating at the earliest representable instant
fn shift_back(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    t.checked_sub_signed(d).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `t + d`, saturating at the latest representable instant
fn shift_forward(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    t.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn market(history: &[(i64, Decimal)]) -> Market {
        Market {
            id: "m1".to_string(),
            title: "Test".to_string(),
            description: String::new(),
            tags: BTreeSet::new(),
            end_date: None,
            created_at: None,
            resolution_criteria: String::new(),
            clob_token_ids: vec!["yes".to_string()],
            closed: true,
            volume: None,
            slug: None,
            price_history: history
                .iter()
                .map(|(t, p)| PricePoint::new(at(*t), *p))
                .collect(),
        }
    }

    fn calculator(threshold: Decimal, lookback: usize, padding_secs: i64) -> WindowCalculator {
        WindowCalculator::new(WindowParams {
            threshold,
            lookback,
            padding: Duration::seconds(padding_secs),
            ..Default::default()
        })
    }

    #[test]
    fn test_no_shock_below_threshold() {
        let mut m = market(&[(0, dec!(0.50)), (100, dec!(0.55)), (200, dec!(0.52))]);
        m.end_date = Some(at(1000));
        let windows = calculator(dec!(0.3), 1, 50).compute(&m).unwrap();
        assert!(windows.shocks.is_empty());
        assert_eq!(windows.market.start, at(0));
        assert_eq!(windows.market.end, at(1000));
    }

    #[test]
    fn test_single_jump_yields_one_shock_containing_it() {
        let mut m = market(&[
            (0, dec!(0.5)),
            (100, dec!(0.5)),
            (200, dec!(0.5)),
            (300, dec!(0.9)),
            (400, dec!(0.9)),
        ]);
        m.end_date = Some(at(1000));
        let windows = calculator(dec!(0.3), 1, 50).compute(&m).unwrap();
        assert_eq!(windows.shocks.len(), 1);
        assert!(windows.shocks[0].contains(at(300)));
        assert_eq!(windows.shocks[0].kind, WindowKind::Shock);
    }

    #[test]
    fn test_scenario_three_points() {
        // end_date 2024-01-10, prices 0.5, 0.5, 0.9 with θ=0.3, L=1
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();

        let mut m = market(&[]);
        m.end_date = Some(end);
        m.set_price_history(vec![
            PricePoint::new(t0, dec!(0.5)),
            PricePoint::new(t1, dec!(0.5)),
            PricePoint::new(t2, dec!(0.9)),
        ]);

        let calc = WindowCalculator::new(WindowParams {
            threshold: dec!(0.3),
            lookback: 1,
            padding: Duration::hours(12),
            ..Default::default()
        });
        let windows = calc.compute(&m).unwrap();

        assert_eq!(windows.market.start, t0);
        assert_eq!(windows.market.end, end);
        assert_eq!(windows.shocks.len(), 1);
        assert!(windows.shocks[0].contains(t2));
        assert!(!windows.shocks[0].contains(t1));
    }

    #[test]
    fn test_short_history_yields_no_shocks() {
        let mut m = market(&[(0, dec!(0.1)), (10, dec!(0.9))]);
        m.end_date = Some(at(100));
        let windows = calculator(dec!(0.3), 2, 5).compute(&m).unwrap();
        assert!(windows.shocks.is_empty());
    }

    #[test]
    fn test_overlapping_shocks_merge() {
        let mut m = market(&[
            (0, dec!(0.1)),
            (10, dec!(0.6)),
            (20, dec!(0.1)),
            (1000, dec!(0.1)),
            (1010, dec!(0.9)),
        ]);
        m.end_date = Some(at(5000));
        let windows = calculator(dec!(0.3), 1, 30).compute(&m).unwrap();
        assert_eq!(windows.shocks.len(), 2);
        assert_eq!(windows.shocks[0].start, at(0));
        assert_eq!(windows.shocks[0].end, at(50));
        assert!(windows.shocks[1].contains(at(1010)));
    }

    #[test]
    fn test_shock_clipped_to_market_window() {
        let mut m = market(&[(100, dec!(0.1)), (110, dec!(0.9))]);
        m.end_date = Some(at(120));
        let windows = calculator(dec!(0.3), 1, 1000).compute(&m).unwrap();
        assert_eq!(windows.shocks[0].start, at(100));
        assert_eq!(windows.shocks[0].end, at(120));
    }

    #[test]
    fn test_no_history_no_end_is_degraded_warning() {
        let mut m = market(&[]);
        m.created_at = Some(at(500));
        let windows = WindowCalculator::with_defaults().compute(&m).unwrap();
        assert!(windows.market.is_degraded());
        assert_eq!(windows.market.start, at(500));
        assert_eq!(windows.warnings.len(), 1);
        assert!(windows.shocks.is_empty());
    }

    #[test]
    fn test_no_anchor_is_error() {
        let m = market(&[]);
        assert_eq!(
            WindowCalculator::with_defaults().compute(&m),
            Err(WindowError::NoAnchor("m1".to_string()))
        );
    }

    #[test]
    fn test_market_window_covers_late_observations() {
        let mut m = market(&[(0, dec!(0.5)), (200, dec!(0.5))]);
        m.end_date = Some(at(100));
        let windows = WindowCalculator::with_defaults().compute(&m).unwrap();
        assert!(windows.market.contains(at(200)));
    }

    #[test]
    fn test_lead_and_lag_extend_market_window() {
        let mut m = market(&[(1000, dec!(0.5))]);
        m.end_date = Some(at(2000));
        let calc = WindowCalculator::new(WindowParams {
            lead: Duration::seconds(100),
            lag: Duration::seconds(50),
            ..Default::default()
        });
        let windows = calc.compute(&m).unwrap();
        assert_eq!(windows.market.start, at(900));
        assert_eq!(windows.market.end, at(2050));
    }

    #[test]
    fn test_extreme_extensions_saturate() {
        let mut m = market(&[(1000, dec!(0.1)), (2000, dec!(0.9))]);
        m.end_date = Some(at(3000));
        let huge = Duration::days(4_000_000_000);
        let calc = WindowCalculator::new(WindowParams {
            threshold: dec!(0.3),
            lookback: 1,
            padding: huge,
            lead: huge,
            lag: huge,
        });
        let windows = calc.compute(&m).unwrap();
        assert_eq!(windows.market.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(windows.market.end, DateTime::<Utc>::MAX_UTC);
        assert_eq!(windows.shocks.len(), 1);
        assert_eq!(windows.shocks[0].start, windows.market.start);
    }

    #[test]
    fn test_deterministic() {
        let mut m = market(&[(0, dec!(0.2)), (10, dec!(0.8)), (20, dec!(0.1))]);
        m.end_date = Some(at(100));
        let calc = calculator(dec!(0.3), 1, 5);
        assert_eq!(calc.compute(&m).unwrap(), calc.compute(&m).unwrap());
    }
}
