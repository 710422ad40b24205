//! Cooperative stop signal
//!
//! In-flight page fetches are allowed to finish; streams check the signal
//! before requesting the next page.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected handle/signal pair
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Triggers the stop (held by the Ctrl-C task)
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !*self.tx.borrow() {
            tracing::info!("Stop requested, finishing in-flight pages");
        }
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes the stop request
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        stop_channel().1
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop is requested
    pub async fn stopped(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            // Sender dropped without stopping: never resolve.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_is_observed_by_clones() {
        let (handle, signal) = stop_channel();
        let other = signal.clone();
        assert!(!signal.is_stopped());

        handle.stop();
        assert!(signal.is_stopped());
        assert!(other.is_stopped());
        assert!(handle.signal().is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_resolves() {
        let (handle, mut signal) = stop_channel();
        let waiter = tokio::spawn(async move { signal.stopped().await });
        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_stays_pending() {
        let mut signal = StopSignal::never();
        let res = tokio::time::timeout(Duration::from_secs(60), signal.stopped()).await;
        assert!(res.is_err());
        assert!(!signal.is_stopped());
    }
}
