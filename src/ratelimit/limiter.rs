//! Per-source token bucket rate limiter
//!
//! Each source owns one bucket behind a `std::sync::Mutex`. `acquire` takes a
//! reservation under the lock and sleeps outside it, so two callers can never
//! be granted the same slot and no lock is held across an await point.

use super::backoff::{Backoff, BackoffPolicy};
use crate::collector::SourceKind;
use crate::telemetry::{self, CounterMetric};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Request budget of a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quota {
    /// Token bucket refilling at `rps` tokens per second, holding at most `burst`
    Limited { rps: f64, burst: u32 },
    /// Offline dump reads; never waits
    Unlimited,
}

impl Quota {
    pub fn per_second(rps: f64, burst: u32) -> Self {
        Quota::Limited {
            rps,
            burst: burst.max(1),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    quota: Quota,
    tokens: f64,
    refilled_at: Instant,
    last_grant: Option<Instant>,
    backoff: Backoff,
}

impl Bucket {
    fn new(quota: Quota, policy: BackoffPolicy) -> Self {
        let tokens = match quota {
            Quota::Limited { burst, .. } => f64::from(burst),
            Quota::Unlimited => 0.0,
        };
        Self {
            quota,
            tokens,
            refilled_at: Instant::now(),
            last_grant: None,
            backoff: Backoff::new(policy),
        }
    }

    /// Reserve the next slot and return the instant it becomes usable
    fn reserve(&mut self, now: Instant) -> Instant {
        let Quota::Limited { rps, burst } = self.quota else {
            return now;
        };

        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rps).min(f64::from(burst));
        self.refilled_at = now;

        // a negative balance is debt owed by earlier reservations
        self.tokens -= 1.0;
        let mut ready = if self.tokens >= 0.0 || rps <= 0.0 {
            now
        } else {
            now + Duration::from_secs_f64(-self.tokens / rps)
        };

        let penalty = self.backoff.penalty();
        if !penalty.is_zero() {
            if let Some(last) = self.last_grant {
                ready = ready.max(last + penalty);
            }
        }

        self.last_grant = Some(self.last_grant.map_or(ready, |last| last.max(ready)));
        ready
    }
}

/// Shared rate limiter with one bucket per source
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<SourceKind, Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a limiter with no configured sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source's quota and backoff policy
    pub fn with_source(mut self, source: SourceKind, quota: Quota, policy: BackoffPolicy) -> Self {
        self.buckets
            .insert(source, Mutex::new(Bucket::new(quota, policy)));
        self
    }

    /// Wait until `source` may issue its next request
    ///
    /// Sources without a registered bucket are unlimited.
    pub async fn acquire(&self, source: SourceKind) {
        let Some(bucket) = self.buckets.get(&source) else {
            return;
        };

        let now = Instant::now();
        let ready = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reserve(now);

        if ready > now {
            tracing::trace!(
                source = %source,
                wait_ms = (ready - now).as_millis() as u64,
                "Waiting for rate limit slot"
            );
            tokio::time::sleep_until(ready).await;
        }
    }

    /// Record a throttle signal (HTTP 429) or transient failure from `source`
    pub fn report_throttled(&self, source: SourceKind) -> Duration {
        let Some(bucket) = self.buckets.get(&source) else {
            return Duration::ZERO;
        };

        let penalty = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .backoff
            .on_throttled();

        telemetry::increment(CounterMetric::Throttled, source, 1);
        tracing::warn!(
            source = %source,
            penalty_ms = penalty.as_millis() as u64,
            "Source throttled or failing, backing off"
        );
        penalty
    }

    /// Record a successful request to `source`
    pub fn report_success(&self, source: SourceKind) {
        if let Some(bucket) = self.buckets.get(&source) {
            bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .backoff
                .on_success();
        }
    }

    /// Current backoff penalty of `source`
    pub fn penalty(&self, source: SourceKind) -> Duration {
        self.buckets.get(&source).map_or(Duration::ZERO, |bucket| {
            bucket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .backoff
                .penalty()
        })
    }

    /// Whether `source` is rate limited at all
    pub fn is_limited(&self, source: SourceKind) -> bool {
        self.buckets.get(&source).is_some_and(|bucket| {
            matches!(
                bucket.lock().unwrap_or_else(PoisonError::into_inner).quota,
                Quota::Limited { .. }
            )
        })
    }
}
