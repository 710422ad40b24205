//! Request pacing for remote sources
//!
//! One token bucket per source plus an exponential backoff penalty that grows
//! on throttle signals and clears after a run of successful requests.

mod backoff;
mod limiter;

pub use backoff::{Backoff, BackoffPolicy};
pub use limiter::{Quota, RateLimiter};
