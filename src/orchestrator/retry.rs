//! Per-pair retry state machine
//!
//! A pair starts `Pending`. Each retryable error moves it to `Retrying(n)`;
//! a successful page returns it to `Pending`, so `n` counts consecutive
//! failures. More than `max_retries` consecutive failures, or any
//! non-retryable error, ends in `Failed`. `Succeeded` and `Failed` absorb
//! every further event.

use crate::collector::CollectError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum RetryState {
    #[default]
    Pending,
    /// Waiting before retry number `n` (1-based)
    Retrying(u32),
    Succeeded,
    Failed,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// A page was fetched and stored
    PageOk,
    /// The pair has no further pages
    Exhausted,
    /// Transient or rate-limit error
    Retryable,
    /// Any other error
    Fatal,
}

impl RetryEvent {
    pub fn from_error(err: &CollectError) -> Self {
        if err.is_retryable() {
            RetryEvent::Retryable
        } else {
            RetryEvent::Fatal
        }
    }
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::Failed)
    }

    /// Consecutive failed attempts so far
    pub fn failures(&self) -> u32 {
        match self {
            RetryState::Retrying(n) => *n,
            _ => 0,
        }
    }

    /// Apply one event
    pub fn next(self, event: RetryEvent, max_retries: u32) -> RetryState {
        if self.is_terminal() {
            return self;
        }
        match event {
            RetryEvent::PageOk => RetryState::Pending,
            RetryEvent::Exhausted => RetryState::Succeeded,
            RetryEvent::Fatal => RetryState::Failed,
            RetryEvent::Retryable => {
                let attempt = self.failures() + 1;
                if attempt > max_retries {
                    RetryState::Failed
                } else {
                    RetryState::Retrying(attempt)
                }
            }
        }
    }
}
