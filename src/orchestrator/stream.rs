//! Restartable page stream over one collector scope
//!
//! `PageStream` turns `fetch_page` + `normalize` + `retain` into a sequence of
//! batches, each carrying the checkpoint to resume after it. Retryable errors
//! are retried in place according to [`RetryState`]; the stop signal is
//! checked before every fetch, never during one.

use super::retry::{RetryEvent, RetryState};
use super::stop::StopSignal;
use crate::collector::{Checkpoint, CollectError, Cursor, SourceCollector};
use crate::ratelimit::BackoffPolicy;
use crate::telemetry::{self, CounterMetric};
use std::time::Duration;
use tracing::{debug, warn};

/// Normalized records of one page
#[derive(Debug)]
pub struct Batch<R> {
    pub records: Vec<R>,
    /// Raw records on the page
    pub fetched: usize,
    /// Raw records skipped as malformed
    pub malformed: usize,
    /// Resume point after this page, `None` on the last page
    pub checkpoint: Option<Checkpoint>,
}

/// Result of advancing a stream
#[derive(Debug)]
pub enum Step<R> {
    Batch(Batch<R>),
    /// No further pages
    Exhausted,
    /// Stop requested before the next fetch
    Stopped,
    /// Gave up on the scope
    Failed(CollectError),
}

pub struct PageStream<'a, C: SourceCollector> {
    collector: &'a C,
    scope: &'a C::Scope,
    cursor: Option<Cursor>,
    state: RetryState,
    max_retries: u32,
    retry_delay: BackoffPolicy,
    stop: StopSignal,
    retries: u32,
}

impl<'a, C: SourceCollector> PageStream<'a, C> {
    pub fn new(collector: &'a C, scope: &'a C::Scope, start: Cursor, stop: StopSignal) -> Self {
        Self {
            collector,
            scope,
            cursor: Some(start),
            state: RetryState::Pending,
            max_retries: 3,
            retry_delay: BackoffPolicy::default(),
            stop,
            retries: 0,
        }
    }

    /// Consecutive transient failures tolerated per page
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Delays between retries of a transient failure
    pub fn retry_delay(mut self, policy: BackoffPolicy) -> Self {
        self.retry_delay = policy;
        self
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Fetch and process the next page
    pub async fn next(&mut self) -> Step<C::Record> {
        let source = self.collector.source();
        loop {
            let Some(cursor) = self.cursor.clone() else {
                self.state = self.state.next(RetryEvent::Exhausted, self.max_retries);
                return Step::Exhausted;
            };
            if self.stop.is_stopped() {
                return Step::Stopped;
            }

            let err = match self.collector.fetch_page(self.scope, &cursor).await {
                Ok(page) => {
                    self.state = self.state.next(RetryEvent::PageOk, self.max_retries);
                    let fetched = page.records.len();
                    let mut records = Vec::with_capacity(fetched);
                    let mut malformed = 0;

                    for raw in &page.records {
                        match self.collector.normalize(self.scope, raw) {
                            Ok(record) => {
                                if self.collector.retain(self.scope, &record) {
                                    records.push(record);
                                }
                            }
                            Err(e) => {
                                malformed += 1;
                                debug!(source = %source, error = %e, "Skipping malformed record");
                            }
                        }
                    }

                    telemetry::increment(CounterMetric::PagesFetched, source, 1);
                    let kept = records.len() as u64;
                    telemetry::increment(CounterMetric::RecordsCollected, source, kept);
                    if malformed > 0 {
                        let skipped = malformed as u64;
                        telemetry::increment(CounterMetric::MalformedRecords, source, skipped);
                    }

                    let checkpoint = page
                        .next
                        .as_ref()
                        .map(|next| self.collector.checkpoint(self.scope, next));
                    self.cursor = page.next;
                    return Step::Batch(Batch {
                        records,
                        fetched,
                        malformed,
                        checkpoint,
                    });
                }
                Err(e) => e,
            };

            self.state = self
                .state
                .next(RetryEvent::from_error(&err), self.max_retries);
            let RetryState::Retrying(attempt) = self.state else {
                return Step::Failed(err);
            };

            self.retries += 1;
            telemetry::increment(CounterMetric::Retries, source, 1);
            // Throttling is already paced by the limiter's penalty
            let delay = if err.is_rate_limit() {
                Duration::ZERO
            } else {
                self.retry_delay.delay_for(attempt)
            };
            warn!(
                source = %source,
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Page fetch failed, retrying"
            );

            if !delay.is_zero() {
                let mut stop = self.stop.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.stopped() => return Step::Stopped,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Page, SourceKind};
    use crate::orchestrator::stop::stop_channel;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted responses; page `n` is addressed by `Cursor::Offset`
    struct Scripted {
        responses: Mutex<VecDeque<Result<Page, CollectError>>>,
        calls: Mutex<Vec<Cursor>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<Page, CollectError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Cursor> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceCollector for Scripted {
        type Scope = ();
        type Record = u64;

        fn source(&self) -> SourceKind {
            SourceKind::Reddit
        }

        async fn discover(&self) -> Result<Vec<()>, CollectError> {
            Ok(vec![()])
        }

        async fn fetch_page(&self, _scope: &(), cursor: &Cursor) -> Result<Page, CollectError> {
            self.calls.lock().unwrap().push(cursor.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::new(Vec::new(), None)))
        }

        fn normalize(&self, _scope: &(), raw: &Value) -> Result<u64, CollectError> {
            raw.as_u64()
                .ok_or_else(|| CollectError::MalformedRecord(raw.to_string()))
        }

        fn retain(&self, _scope: &(), record: &u64) -> bool {
            record % 2 == 1
        }

        fn fingerprint(&self, _scope: &()) -> String {
            "scripted".to_string()
        }
    }

    fn page(records: Vec<Value>, next: Option<u64>) -> Result<Page, CollectError> {
        Ok(Page::new(records, next.map(|offset| Cursor::Offset { offset })))
    }

    #[tokio::test]
    async fn test_batches_filter_and_count_malformed() {
        let c = Scripted::new(vec![
            page(vec![json!(1), json!(2), json!("x"), json!(3)], Some(1)),
            page(vec![json!(5)], None),
        ]);
        let (_handle, stop) = stop_channel();
        let mut stream = PageStream::new(&c, &(), Cursor::Start, stop);

        let Step::Batch(first) = stream.next().await else {
            panic!("expected batch");
        };
        assert_eq!(first.records, vec![1, 3]);
        assert_eq!(first.fetched, 4);
        assert_eq!(first.malformed, 1);
        assert_eq!(
            first.checkpoint.map(|cp| cp.cursor),
            Some(Cursor::Offset { offset: 1 })
        );

        let Step::Batch(second) = stream.next().await else {
            panic!("expected batch");
        };
        assert_eq!(second.records, vec![5]);
        assert!(second.checkpoint.is_none());

        assert!(matches!(stream.next().await, Step::Exhausted));
        assert_eq!(stream.state(), RetryState::Succeeded);
        assert_eq!(c.calls(), vec![Cursor::Start, Cursor::Offset { offset: 1 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_same_cursor() {
        let c = Scripted::new(vec![
            Err(CollectError::Transient("503".into())),
            Err(CollectError::RateLimited("429".into())),
            page(vec![json!(7)], None),
        ]);
        let (_handle, stop) = stop_channel();
        let mut stream =
            PageStream::new(&c, &(), Cursor::Offset { offset: 4 }, stop).max_retries(2);

        let Step::Batch(batch) = stream.next().await else {
            panic!("expected batch");
        };
        assert_eq!(batch.records, vec![7]);
        assert_eq!(stream.retries(), 2);
        assert_eq!(c.calls(), vec![Cursor::Offset { offset: 4 }; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_fails() {
        let c = Scripted::new(vec![
            Err(CollectError::Transient("a".into())),
            Err(CollectError::Transient("b".into())),
            Err(CollectError::Transient("c".into())),
        ]);
        let (_handle, stop) = stop_channel();
        let mut stream = PageStream::new(&c, &(), Cursor::Start, stop).max_retries(2);

        match stream.next().await {
            Step::Failed(CollectError::Transient(msg)) => assert_eq!(msg, "c"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stream.state(), RetryState::Failed);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let c = Scripted::new(vec![Err(CollectError::Source("401".into()))]);
        let (_handle, stop) = stop_channel();
        let mut stream = PageStream::new(&c, &(), Cursor::Start, stop);

        assert!(matches!(stream.next().await, Step::Failed(CollectError::Source(_))));
        assert_eq!(c.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_prevents_next_fetch() {
        let c = Scripted::new(vec![page(vec![json!(1)], Some(1)), page(vec![json!(3)], None)]);
        let (handle, stop) = stop_channel();
        let mut stream = PageStream::new(&c, &(), Cursor::Start, stop);

        assert!(matches!(stream.next().await, Step::Batch(_)));
        handle.stop();
        assert!(matches!(stream.next().await, Step::Stopped));
        assert_eq!(c.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_retry_wait() {
        let c = Scripted::new(vec![Err(CollectError::Transient("503".into()))]);
        let (handle, stop) = stop_channel();
        let policy = BackoffPolicy::default().initial(Duration::from_secs(600));
        let mut stream = PageStream::new(&c, &(), Cursor::Start, stop).retry_delay(policy);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.stop();
        });
        assert!(matches!(stream.next().await, Step::Stopped));
        stopper.await.unwrap();
        assert_eq!(c.calls().len(), 1);
    }
}
