//! Per-market query sets
//!
//! Entities, hashtags, aliases and key phrases derived from a market's
//! question, used to decide whether a social post is about the market.

pub mod aliases;
mod builder;

pub use builder::{QuerySet, QuerySetBuilder, DEFAULT_MAX_PHRASES};
