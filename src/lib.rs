//! poly-signals: Polymarket market data aligned with Reddit and Twitter discussion
//!
//! This library provides the core components for:
//! - Market discovery, filtering and price history via the CLOB API
//! - Collection windows around market lifetimes and price shocks
//! - Per-market keyword query sets
//! - Reddit and Twitter collection from live APIs or offline dumps
//! - Rate limiting with adaptive backoff per source
//! - Resumable runs tracked in a crash-safe manifest
//! - Atomic JSON, JSONL and CSV outputs
//! - Structured logging and Prometheus metrics

pub mod cli;
pub mod collector;
pub mod config;
pub mod data;
pub mod fields;
pub mod market;
pub mod orchestrator;
pub mod query;
pub mod ratelimit;
pub mod telemetry;
pub mod time;
pub mod window;
