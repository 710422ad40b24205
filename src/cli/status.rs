//! Status and config commands

use crate::config::{Backend, Config, SocialSourceConfig};
use crate::data::OutputLayout;
use crate::orchestrator::{ManifestStore, RunSummary};

/// Print the manifest of the current (or last) run
pub fn print_status(config: &Config) -> anyhow::Result<()> {
    let layout = OutputLayout::new(&config.output.dir);
    let Some(manifest) = ManifestStore::read(&layout.manifest())? else {
        println!("No run manifest at {}", layout.manifest().display());
        return Ok(());
    };

    println!("poly-signals status");
    println!("  Run: {}", manifest.run_id);
    println!("  Started: {}", manifest.started_at.to_rfc3339());
    if let Some(finished) = manifest.finished_at {
        println!("  Finished: {}", finished.to_rfc3339());
    }
    for (status, count) in manifest.counts() {
        println!("  {:<10} {}", status.as_str(), count);
    }
    for warning in &manifest.warnings {
        println!("  warning: {warning}");
    }
    println!();
    println!("{}", RunSummary::from_manifest(&manifest));
    Ok(())
}

fn describe_social(section: &SocialSourceConfig) -> String {
    if !section.enabled {
        return "disabled".to_string();
    }
    match section.backend {
        Backend::Dump => format!(
            "dump {}",
            section
                .dump_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        ),
        Backend::Api => format!(
            "api {} rps, burst {}",
            section.rate.rate_limit_rps, section.rate.burst
        ),
    }
}

/// Print the effective configuration
pub fn print_config(config: &Config) {
    let windows = &config.windows;
    println!("Current configuration:");
    println!("  Output: {}", config.output.dir.display());
    println!(
        "  Polymarket: {} ({} rps, burst {})",
        config.polymarket.base_url, config.polymarket.rate.rate_limit_rps, config.polymarket.rate.burst
    );
    if let Some(cap) = config.polymarket.max_markets {
        println!("  Max markets: {cap}");
    }
    println!(
        "  Windows: shock={} lookback={} padding={}s lead={}d lag={}d",
        windows.shock_threshold,
        windows.shock_lookback,
        windows.shock_padding_secs,
        windows.lead_days,
        windows.lag_days
    );
    println!(
        "  Retries: max={} timeout={}s",
        config.orchestrator.max_retries, config.orchestrator.request_timeout_secs
    );
    println!("  Reddit: {}", describe_social(&config.reddit));
    println!("  Twitter: {}", describe_social(&config.twitter));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_social() {
        let mut section = SocialSourceConfig::default();
        section.dump_path = Some("/data/rs".into());
        assert_eq!(describe_social(&section), "dump /data/rs");

        section.backend = Backend::Api;
        assert_eq!(describe_social(&section), "api 1 rps, burst 1");

        section.enabled = false;
        assert_eq!(describe_social(&section), "disabled");
    }

    #[test]
    fn test_status_without_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.output.dir = dir.path().to_path_buf();
        print_status(&config).unwrap();
    }
}
