//! Builds collectors and the orchestrator from configuration

use crate::collector::reddit::{RedditApi, RedditApiConfig};
use crate::collector::twitter::{TwitterApi, TwitterApiConfig};
use crate::collector::{
    DumpSet, HttpClient, PolymarketCollector, RedditBackend, RedditCollector, SourceKind,
    TwitterBackend, TwitterCollector,
};
use crate::config::{Backend, Config, SocialSourceConfig};
use crate::data::OutputLayout;
use crate::orchestrator::{Orchestrator, RunOptions, StopSignal};
use crate::ratelimit::RateLimiter;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;

/// Which social sources take part in a run
#[derive(Debug, Clone, Copy, Default)]
pub struct SocialSelection {
    pub reddit: bool,
    pub twitter: bool,
}

/// One limiter shared by every HTTP client, with a bucket per source
pub fn build_limiter(config: &Config) -> RateLimiter {
    RateLimiter::new()
        .with_source(
            SourceKind::Polymarket,
            config.polymarket.rate.quota(),
            config.polymarket.rate.backoff(),
        )
        .with_source(
            SourceKind::Reddit,
            config.reddit.quota(),
            config.reddit.rate.backoff(),
        )
        .with_source(
            SourceKind::Twitter,
            config.twitter.quota(),
            config.twitter.rate.backoff(),
        )
}

fn open_dump(section: &SocialSourceConfig, source: SourceKind) -> anyhow::Result<DumpSet> {
    let path = section
        .dump_path
        .as_deref()
        .with_context(|| format!("[{source}] dump backend needs dump_path"))?;
    let dump = DumpSet::open(path).with_context(|| dump_context(source, path))?;
    tracing::info!(source = %source, files = dump.files().len(), "Opened dump");
    Ok(dump)
}

fn dump_context(source: SourceKind, path: &Path) -> String {
    format!("Failed to open {source} dump at {}", path.display())
}

fn reddit_collector(config: &Config, http: HttpClient) -> anyhow::Result<RedditCollector> {
    let section = &config.reddit;
    let backend = match section.backend {
        Backend::Dump => RedditBackend::Dump(open_dump(section, SourceKind::Reddit)?),
        Backend::Api => {
            let creds = &section.credentials;
            let (Some(id), Some(secret)) = (&creds.client_id, &creds.client_secret) else {
                anyhow::bail!("[reddit] api backend needs client_id and client_secret");
            };
            RedditBackend::Api(RedditApi::new(RedditApiConfig::new(id, secret), http))
        }
    };
    Ok(RedditCollector::new(
        backend,
        &section.subreddits,
        section.page_size,
    ))
}

fn twitter_collector(config: &Config, http: HttpClient) -> anyhow::Result<TwitterCollector> {
    let section = &config.twitter;
    let backend = match section.backend {
        Backend::Dump => TwitterBackend::Dataset(open_dump(section, SourceKind::Twitter)?),
        Backend::Api => {
            let Some(token) = &section.credentials.bearer_token else {
                anyhow::bail!("[twitter] api backend needs bearer_token");
            };
            let mut api_config = TwitterApiConfig::new(token);
            api_config.full_archive = section.credentials.full_archive;
            TwitterBackend::Api(TwitterApi::new(api_config, http))
        }
    };
    Ok(TwitterCollector::new(backend, section.page_size))
}

/// Wire every configured source into an orchestrator
pub fn build_orchestrator(
    config: &Config,
    options: RunOptions,
    social: SocialSelection,
    stop: StopSignal,
) -> anyhow::Result<Orchestrator> {
    let limiter = Arc::new(build_limiter(config));
    let timeout = config.orchestrator.request_timeout();
    let http = |source| HttpClient::new(source, limiter.clone(), timeout);

    let polymarket = PolymarketCollector::new(
        config.polymarket.collector_config(),
        http(SourceKind::Polymarket)?,
    );

    let layout = OutputLayout::new(&config.output.dir);
    let mut orchestrator = Orchestrator::new(layout, polymarket, options, stop)
        .with_context(|| format!("Failed to open output dir {}", config.output.dir.display()))?
        .with_window_params(config.windows.params())
        .with_retry_delay(SourceKind::Polymarket, config.polymarket.rate.backoff())
        .with_retry_delay(SourceKind::Reddit, config.reddit.rate.backoff())
        .with_retry_delay(SourceKind::Twitter, config.twitter.rate.backoff());

    if social.reddit {
        let collector = reddit_collector(config, http(SourceKind::Reddit)?)?;
        orchestrator = orchestrator.with_reddit(collector, config.reddit.fan_out);
    }
    if social.twitter {
        let collector = twitter_collector(config, http(SourceKind::Twitter)?)?;
        orchestrator = orchestrator.with_twitter(collector, config.twitter.fan_out);
    }
    Ok(orchestrator)
}
