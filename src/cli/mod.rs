//! CLI interface for poly-signals
//!
//! Provides subcommands for:
//! - `run`: Full collection pipeline (markets, histories, windows, social)
//! - `collect`: A single source, or user positions
//! - `status`: Show the run manifest
//! - `config`: Show the effective configuration

mod collect;
mod run;
mod setup;
mod status;

pub use collect::{CollectArgs, CollectSource, PolymarketMode};
pub use run::RunArgs;
pub use setup::{build_limiter, build_orchestrator, SocialSelection};
pub use status::{print_config, print_status};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "poly-signals")]
#[command(about = "Collects Polymarket markets and window-aligned Reddit/Twitter posts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full collection pipeline
    Run(RunArgs),
    /// Collect from a single source
    Collect(CollectArgs),
    /// Show progress of the current run
    Status,
    /// Show configuration
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from([
            "poly-signals",
            "-c",
            "custom.toml",
            "run",
            "--fresh",
            "--max-markets",
            "25",
            "--no-twitter",
        ]);
        assert_eq!(cli.config, "custom.toml");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.fresh);
        assert!(!args.reset_mismatched);
        assert_eq!(args.max_markets, Some(25));
        assert!(args.no_twitter);
        assert!(!args.no_reddit);
    }

    #[test]
    fn test_parse_collect_positions() {
        let cli = Cli::parse_from([
            "poly-signals",
            "collect",
            "polymarket",
            "positions",
            "--address",
            "0xabc",
        ]);
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.source, CollectSource::Polymarket);
        assert_eq!(args.mode, Some(PolymarketMode::Positions));
        assert_eq!(args.address.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_parse_collect_social() {
        let cli = Cli::parse_from(["poly-signals", "collect", "reddit", "--reset-mismatched"]);
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.source, CollectSource::Reddit);
        assert!(args.reset_mismatched);
        assert!(args.mode.is_none());
    }

    #[test]
    fn test_status_and_config() {
        assert!(matches!(
            Cli::parse_from(["poly-signals", "status"]).command,
            Commands::Status
        ));
        assert!(matches!(
            Cli::parse_from(["poly-signals", "config"]).command,
            Commands::Config
        ));
    }
}
