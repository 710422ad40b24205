//! Collect command implementation

use super::setup::{build_orchestrator, SocialSelection};
use crate::config::Config;
use crate::orchestrator::{RunOptions, RunStatus, StopSignal};
use clap::{Args, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectSource {
    Polymarket,
    Reddit,
    Twitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolymarketMode {
    /// Markets and their price histories
    Markets,
    /// Positions of one user address
    Positions,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Source to collect from
    #[arg(value_enum)]
    pub source: CollectSource,

    /// What to collect from Polymarket (default: markets)
    #[arg(value_enum)]
    pub mode: Option<PolymarketMode>,

    /// User address for positions mode
    #[arg(long)]
    pub address: Option<String>,

    /// Start a new run, ignoring the existing manifest
    #[arg(long)]
    pub fresh: bool,

    /// Discard checkpoints that no longer match their source
    #[arg(long)]
    pub reset_mismatched: bool,

    /// Cap on discovered markets
    #[arg(long)]
    pub max_markets: Option<usize>,
}

impl CollectArgs {
    pub async fn execute(&self, config: &Config, stop: StopSignal) -> anyhow::Result<RunStatus> {
        let options = RunOptions {
            fresh: self.fresh,
            reset_mismatched: self.reset_mismatched,
            max_markets: self.max_markets.or(config.polymarket.max_markets),
            max_retries: config.orchestrator.max_retries,
            history_fan_out: config.orchestrator.history_fan_out,
        };

        if self.mode.is_some() && self.source != CollectSource::Polymarket {
            anyhow::bail!("markets/positions modes only apply to polymarket");
        }

        let social = SocialSelection {
            reddit: self.source == CollectSource::Reddit,
            twitter: self.source == CollectSource::Twitter,
        };
        let orchestrator = build_orchestrator(config, options, social, stop)?;

        let summary = match self.mode {
            Some(PolymarketMode::Positions) => {
                let Some(address) = self.address.as_deref() else {
                    anyhow::bail!("positions mode requires --address");
                };
                tracing::info!(address, "Collecting positions");
                orchestrator.collect_positions(address).await?
            }
            _ => {
                tracing::info!(source = ?self.source, "Collecting single source");
                orchestrator.run().await?
            }
        };

        println!("{summary}");
        Ok(summary.status)
    }
}
