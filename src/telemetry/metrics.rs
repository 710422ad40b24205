//! Prometheus metrics

use crate::collector::SourceKind;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Counter metric types, all labelled by source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// HTTP requests that returned success
    Requests,
    /// Throttle responses (HTTP 429)
    Throttled,
    /// Pages fetched from a collector
    PagesFetched,
    /// Normalized records kept
    RecordsCollected,
    /// Raw records skipped as malformed
    MalformedRecords,
    /// Page fetches retried after a transient error
    Retries,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::Requests => "polysignals_requests_total",
            CounterMetric::Throttled => "polysignals_throttled_total",
            CounterMetric::PagesFetched => "polysignals_pages_total",
            CounterMetric::RecordsCollected => "polysignals_records_total",
            CounterMetric::MalformedRecords => "polysignals_malformed_records_total",
            CounterMetric::Retries => "polysignals_retries_total",
        }
    }
}

const PAIRS_TOTAL: &str = "polysignals_pairs_total";
const PAIR_DURATION: &str = "polysignals_pair_duration_seconds";

/// Add `value` to a per-source counter
pub fn increment(metric: CounterMetric, source: SourceKind, value: u64) {
    metrics::counter!(metric.name(), "source" => source.as_str()).increment(value);
}

/// Count a finished pair and record how long it ran
pub fn record_pair(source: SourceKind, status: &'static str, elapsed: Duration) {
    metrics::counter!(PAIRS_TOTAL, "source" => source.as_str(), "status" => status).increment(1);
    metrics::histogram!(PAIR_DURATION, "source" => source.as_str()).record(elapsed.as_secs_f64());
}

fn describe() {
    use CounterMetric::*;
    for metric in [
        Requests,
        Throttled,
        PagesFetched,
        RecordsCollected,
        MalformedRecords,
        Retries,
    ] {
        metrics::describe_counter!(metric.name(), format!("{metric:?}"));
    }
    metrics::describe_counter!(PAIRS_TOTAL, "Finished (source, market) pairs by status");
    metrics::describe_histogram!(
        PAIR_DURATION,
        metrics::Unit::Seconds,
        "Wall time of one (source, market) pair"
    );
}

/// Install the Prometheus recorder with an HTTP listener on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
    describe();
    tracing::info!(%addr, "Serving Prometheus metrics");
    Ok(())
}
