//! Collection orchestration
//!
//! The [`Orchestrator`] discovers markets, attaches price histories, derives
//! query sets and windows, then fans social collection out per source. All
//! progress lives in the [`ManifestStore`] so an interrupted run resumes
//! where it stopped.

pub mod manifest;
pub mod retry;
mod run;
pub mod stop;
pub mod stream;
mod summary;

pub use manifest::{pair_key, ManifestStore, PairRecord, PairStatus, RunManifest, RunStatus};
pub use retry::{RetryEvent, RetryState};
pub use run::{Orchestrator, PairOutcome, RunOptions};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use stream::{Batch, PageStream, Step};
pub use summary::{RunSummary, SummaryRow};
