//! Run command implementation

use super::setup::{build_orchestrator, SocialSelection};
use crate::config::Config;
use crate::orchestrator::{RunOptions, RunStatus, StopSignal};
use clap::Args;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Start a new run, ignoring the existing manifest
    #[arg(long)]
    pub fresh: bool,

    /// Discard checkpoints that no longer match their source and re-collect those pairs
    #[arg(long)]
    pub reset_mismatched: bool,

    /// Cap on discovered markets (overrides [polymarket] max_markets)
    #[arg(long)]
    pub max_markets: Option<usize>,

    /// Skip Reddit collection
    #[arg(long)]
    pub no_reddit: bool,

    /// Skip Twitter collection
    #[arg(long)]
    pub no_twitter: bool,
}

impl RunArgs {
    pub fn options(&self, config: &Config) -> RunOptions {
        RunOptions {
            fresh: self.fresh,
            reset_mismatched: self.reset_mismatched,
            max_markets: self.max_markets.or(config.polymarket.max_markets),
            max_retries: config.orchestrator.max_retries,
            history_fan_out: config.orchestrator.history_fan_out,
        }
    }

    pub async fn execute(&self, config: &Config, stop: StopSignal) -> anyhow::Result<RunStatus> {
        let social = SocialSelection {
            reddit: config.reddit.enabled && !self.no_reddit,
            twitter: config.twitter.enabled && !self.no_twitter,
        };
        tracing::info!(
            output = %config.output.dir.display(),
            reddit = social.reddit,
            twitter = social.twitter,
            fresh = self.fresh,
            "Starting collection run"
        );

        let orchestrator = build_orchestrator(config, self.options(config), social, stop)?;
        let summary = orchestrator.run().await?;
        println!("{summary}");
        Ok(summary.status)
    }
}
