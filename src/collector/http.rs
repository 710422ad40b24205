//! Rate-limited JSON HTTP client shared by the live backends

use super::types::{CollectError, SourceKind};
use crate::ratelimit::RateLimiter;
use crate::telemetry::{self, CounterMetric};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// User agent sent to every source
pub const USER_AGENT: &str = concat!("poly-signals/", env!("CARGO_PKG_VERSION"));

/// HTTP client bound to one source's rate limit bucket
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    source: SourceKind,
}

impl HttpClient {
    /// Create a new client for `source`
    pub fn new(
        source: SourceKind,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Result<Self, CollectError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CollectError::Source(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limiter,
            source,
        })
    }

    /// Underlying client, for building requests with auth headers
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// GET `url` with query parameters and decode a JSON body
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, CollectError> {
        self.send(self.client.get(url).query(query), url).await
    }

    /// Send a prepared request once the rate limiter grants a slot
    ///
    /// Throttling and transient failures are reported to the limiter so the
    /// source's penalty grows; successes count toward clearing it.
    pub async fn send(&self, request: RequestBuilder, context: &str) -> Result<Value, CollectError> {
        self.limiter.acquire(self.source).await;

        tracing::debug!(source = %self.source, url = %context, "Sending request");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.failed(CollectError::from(e))),
        };
        let status = response.status();

        if !status.is_success() {
            tracing::debug!(source = %self.source, status = %status, "Request failed");
            return Err(self.failed(CollectError::from_status(status, context)));
        }

        // a body cut off mid-read is a transport failure, not a bad payload
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Err(self.failed(CollectError::from(e))),
        };

        self.limiter.report_success(self.source);
        telemetry::increment(CounterMetric::Requests, self.source, 1);
        decode_body(&body, context)
    }

    fn failed(&self, err: CollectError) -> CollectError {
        if err.is_retryable() {
            self.limiter.report_throttled(self.source);
        }
        err
    }
}

fn decode_body(body: &[u8], context: &str) -> Result<Value, CollectError> {
    serde_json::from_slice(body)
        .map_err(|e| CollectError::Source(format!("{context}: invalid JSON body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{BackoffPolicy, Quota};

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new().with_source(
            SourceKind::Polymarket,
            Quota::per_second(100.0, 10),
            BackoffPolicy::default().initial(Duration::from_millis(10)),
        ))
    }

    #[test]
    fn test_decode_body() {
        let value = decode_body(br#"{"data": [1, 2]}"#, "x").unwrap();
        assert_eq!(value["data"][1], 2);

        let err = decode_body(b"<html>bad gateway", "x").unwrap_err();
        assert_eq!(err.kind(), "source");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient_and_penalized() {
        // bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let limiter = limiter();
        let client =
            HttpClient::new(SourceKind::Polymarket, limiter.clone(), Duration::from_secs(2))
                .unwrap();

        let err = client
            .get_json(&format!("http://127.0.0.1:{port}/markets"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transient");
        assert_eq!(limiter.penalty(SourceKind::Polymarket), Duration::from_millis(10));
    }

    #[test]
    fn test_non_retryable_errors_leave_penalty_alone() {
        let limiter = limiter();
        let client =
            HttpClient::new(SourceKind::Polymarket, limiter.clone(), Duration::from_secs(1))
                .unwrap();

        let err = client.failed(CollectError::Source("HTTP 403".into()));
        assert_eq!(err.kind(), "source");
        assert_eq!(limiter.penalty(SourceKind::Polymarket), Duration::ZERO);

        client.failed(CollectError::Transient("HTTP 502".into()));
        assert_eq!(limiter.penalty(SourceKind::Polymarket), Duration::from_millis(10));
    }
}
