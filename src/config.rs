//! Configuration types for poly-signals

use crate::collector::{PolymarketConfig, SourceKind};
use crate::market::MarketFilter;
use crate::ratelimit::{BackoffPolicy, Quota};
use crate::window::WindowParams;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration problems, fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub polymarket: PolymarketSection,
    #[serde(default)]
    pub reddit: SocialSourceConfig,
    #[serde(default)]
    pub twitter: SocialSourceConfig,
}

/// Output location
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Serve Prometheus metrics on this port when set
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            metrics_port: None,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Consecutive transient errors tolerated per pair
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Concurrent price-history pairs
    #[serde(default = "default_history_fan_out")]
    pub history_fan_out: usize,
}

fn default_max_retries() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_history_fan_out() -> usize {
    4
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout_secs(),
            history_fan_out: default_history_fan_out(),
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Window derivation parameters
#[derive(Debug, Clone, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_shock_threshold")]
    pub shock_threshold: Decimal,
    /// Lookback in price observations
    #[serde(default = "default_shock_lookback")]
    pub shock_lookback: usize,
    #[serde(default = "default_shock_padding_secs")]
    pub shock_padding_secs: u64,
    #[serde(default)]
    pub lead_days: u32,
    #[serde(default)]
    pub lag_days: u32,
}

fn default_shock_threshold() -> Decimal {
    Decimal::new(10, 2) // 0.10
}
fn default_shock_lookback() -> usize {
    1
}
fn default_shock_padding_secs() -> u64 {
    86_400
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            shock_threshold: default_shock_threshold(),
            shock_lookback: default_shock_lookback(),
            shock_padding_secs: default_shock_padding_secs(),
            lead_days: 0,
            lag_days: 0,
        }
    }
}

/// Upper bound of `lead_days` and `lag_days`
pub const MAX_WINDOW_EXTENSION_DAYS: u32 = 3_650;
/// Upper bound of `shock_padding_secs` (one year)
pub const MAX_SHOCK_PADDING_SECS: u64 = 365 * 86_400;

impl WindowsConfig {
    /// Calculator parameters; out-of-range values are clamped to the validated bounds
    pub fn params(&self) -> WindowParams {
        let padding = self.shock_padding_secs.min(MAX_SHOCK_PADDING_SECS);
        WindowParams {
            threshold: self.shock_threshold,
            lookback: self.shock_lookback,
            padding: chrono::Duration::seconds(padding as i64),
            lead: chrono::Duration::days(i64::from(self.lead_days.min(MAX_WINDOW_EXTENSION_DAYS))),
            lag: chrono::Duration::days(i64::from(self.lag_days.min(MAX_WINDOW_EXTENSION_DAYS))),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.shock_lookback == 0 {
            return Err(ConfigError::Invalid(
                "[windows] shock_lookback must be at least 1".to_string(),
            ));
        }
        if self.shock_threshold <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "[windows] shock_threshold must be positive".to_string(),
            ));
        }
        if self.shock_padding_secs > MAX_SHOCK_PADDING_SECS {
            return Err(ConfigError::Invalid(format!(
                "[windows] shock_padding_secs must be at most {MAX_SHOCK_PADDING_SECS}"
            )));
        }
        if self.lead_days > MAX_WINDOW_EXTENSION_DAYS || self.lag_days > MAX_WINDOW_EXTENSION_DAYS {
            return Err(ConfigError::Invalid(format!(
                "[windows] lead_days and lag_days must be at most {MAX_WINDOW_EXTENSION_DAYS}"
            )));
        }
        Ok(())
    }
}

/// Request pacing shared by every source section
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    /// Sustained requests per second
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    /// Consecutive successes that clear the throttle penalty
    #[serde(default = "default_backoff_reset_after")]
    pub backoff_reset_after: u32,
}

fn default_rate_limit_rps() -> f64 {
    1.0
}
fn default_burst() -> u32 {
    1
}
fn default_backoff_initial_ms() -> u64 {
    1_000
}
fn default_backoff_ceiling_ms() -> u64 {
    60_000
}
fn default_backoff_reset_after() -> u32 {
    5
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            rate_limit_rps: default_rate_limit_rps(),
            burst: default_burst(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            backoff_reset_after: default_backoff_reset_after(),
        }
    }
}

impl RateConfig {
    pub fn quota(&self) -> Quota {
        Quota::per_second(self.rate_limit_rps, self.burst)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::default()
            .initial(Duration::from_millis(self.backoff_initial_ms))
            .ceiling(Duration::from_millis(self.backoff_ceiling_ms))
            .reset_after(self.backoff_reset_after)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if !(self.rate_limit_rps.is_finite() && self.rate_limit_rps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "[{section}] rate_limit_rps must be positive"
            )));
        }
        if self.burst == 0 {
            return Err(ConfigError::Invalid(format!("[{section}] burst must be at least 1")));
        }
        if self.backoff_initial_ms > self.backoff_ceiling_ms {
            return Err(ConfigError::Invalid(format!(
                "[{section}] backoff_initial_ms exceeds backoff_ceiling_ms"
            )));
        }
        Ok(())
    }
}

/// Polymarket collection settings
#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketSection {
    #[serde(default = "default_clob_url")]
    pub base_url: String,
    #[serde(default = "default_data_api_url")]
    pub data_api_url: String,
    #[serde(flatten)]
    pub rate: RateConfig,
    /// Cap on discovered markets
    #[serde(default)]
    pub max_markets: Option<usize>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_history_fidelity_minutes")]
    pub history_fidelity_minutes: u32,
    #[serde(default = "default_history_chunk_days")]
    pub history_chunk_days: u32,
    #[serde(default)]
    pub fetch_history_for_open: bool,
    #[serde(default = "default_min_candles")]
    pub min_candles: usize,
    #[serde(default)]
    pub min_volume: Decimal,
    #[serde(default)]
    pub min_active_days: f64,
}

fn default_clob_url() -> String {
    crate::collector::polymarket::CLOB_API_URL.to_string()
}
fn default_data_api_url() -> String {
    crate::collector::polymarket::DATA_API_URL.to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_history_fidelity_minutes() -> u32 {
    720
}
fn default_history_chunk_days() -> u32 {
    30
}
fn default_min_candles() -> usize {
    10
}

impl Default for PolymarketSection {
    fn default() -> Self {
        Self {
            base_url: default_clob_url(),
            data_api_url: default_data_api_url(),
            rate: RateConfig::default(),
            max_markets: None,
            page_size: default_page_size(),
            history_fidelity_minutes: default_history_fidelity_minutes(),
            history_chunk_days: default_history_chunk_days(),
            fetch_history_for_open: false,
            min_candles: default_min_candles(),
            min_volume: Decimal::ZERO,
            min_active_days: 0.0,
        }
    }
}

impl PolymarketSection {
    pub fn collector_config(&self) -> PolymarketConfig {
        PolymarketConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            data_api_url: self.data_api_url.trim_end_matches('/').to_string(),
            page_size: self.page_size,
            history_fidelity_minutes: self.history_fidelity_minutes,
            history_chunk_days: self.history_chunk_days,
            fetch_history_for_open: self.fetch_history_for_open,
            min_candles: self.min_candles,
            filter: MarketFilter {
                min_volume: self.min_volume,
                min_active_days: self.min_active_days,
            },
        }
    }
}

/// Where a social source reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Offline bulk dump (Pushshift files, tweet datasets)
    #[default]
    Dump,
    /// Live API
    Api,
}

/// API credentials; which fields are needed depends on the source
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Twitter full-archive search (academic access)
    #[serde(default)]
    pub full_archive: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &mask(&self.client_secret))
            .field("bearer_token", &mask(&self.bearer_token))
            .field("full_archive", &self.full_archive)
            .finish()
    }
}

/// Reddit or Twitter collection settings
#[derive(Debug, Clone, Deserialize)]
pub struct SocialSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: Backend,
    /// File or directory for the dump backend
    #[serde(default)]
    pub dump_path: Option<PathBuf>,
    #[serde(flatten)]
    pub rate: RateConfig,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Markets collected concurrently from this source
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    /// Subreddit allow-list (Reddit only; empty allows all)
    #[serde(default)]
    pub subreddits: Vec<String>,
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_true() -> bool {
    true
}
fn default_fan_out() -> usize {
    1
}

impl SocialSourceConfig {
    /// Offline dumps are not rate limited
    pub fn quota(&self) -> Quota {
        match self.backend {
            Backend::Dump => Quota::Unlimited,
            Backend::Api => self.rate.quota(),
        }
    }

    fn validate(&self, source: SourceKind) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        let section = source.as_str();
        if self.page_size == 0 {
            return Err(ConfigError::Invalid(format!("[{section}] page_size must be at least 1")));
        }
        if self.fan_out == 0 {
            return Err(ConfigError::Invalid(format!("[{section}] fan_out must be at least 1")));
        }

        match self.backend {
            Backend::Dump => {
                if self.dump_path.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "[{section}] backend = \"dump\" requires dump_path"
                    )));
                }
            }
            Backend::Api => {
                self.rate.validate(section)?;
                let creds = &self.credentials;
                let missing = match source {
                    SourceKind::Reddit => {
                        creds.client_id.is_none() || creds.client_secret.is_none()
                    }
                    _ => creds.bearer_token.is_none(),
                };
                if missing {
                    let needed = match source {
                        SourceKind::Reddit => "client_id and client_secret",
                        _ => "bearer_token",
                    };
                    return Err(ConfigError::Invalid(format!(
                        "[{section}] backend = \"api\" requires credentials.{needed}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for SocialSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: Backend::Dump,
            dump_path: None,
            rate: RateConfig::default(),
            page_size: default_page_size(),
            fan_out: default_fan_out(),
            subreddits: Vec::new(),
            credentials: Credentials::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("[output] dir is empty".to_string()));
        }
        self.windows.validate()?;
        if self.orchestrator.history_fan_out == 0 {
            return Err(ConfigError::Invalid(
                "[orchestrator] history_fan_out must be at least 1".to_string(),
            ));
        }

        let pm = &self.polymarket;
        pm.rate.validate("polymarket")?;
        if pm.page_size == 0 {
            return Err(ConfigError::Invalid(
                "[polymarket] page_size must be at least 1".to_string(),
            ));
        }
        if pm.max_markets == Some(0) {
            return Err(ConfigError::Invalid(
                "[polymarket] max_markets must be at least 1".to_string(),
            ));
        }

        self.reddit.validate(SourceKind::Reddit)?;
        self.twitter.validate(SourceKind::Twitter)?;
        Ok(())
    }

    /// Settings of a social source
    pub fn social(&self, source: SourceKind) -> Option<&SocialSourceConfig> {
        match source {
            SourceKind::Reddit => Some(&self.reddit),
            SourceKind::Twitter => Some(&self.twitter),
            SourceKind::Polymarket => None,
        }
    }
}
