//! Configuration loading

use poly_signals::config::{Backend, Config, ConfigError};
use poly_signals::ratelimit::Quota;
use rust_decimal_macros::dec;
use std::io::Write;

#[test]
fn test_example_config_loads() {
    let config = Config::from_toml(include_str!("../../config.toml.example")).unwrap();

    assert_eq!(config.output.dir, std::path::PathBuf::from("./data"));
    assert_eq!(config.windows.shock_threshold, dec!(0.10));
    assert_eq!(config.polymarket.rate.burst, 5);
    assert_eq!(config.reddit.backend, Backend::Dump);
    assert_eq!(config.reddit.quota(), Quota::Unlimited);
    assert_eq!(config.reddit.subreddits.len(), 3);
    assert!(!config.twitter.enabled);
    assert_eq!(config.twitter.backend, Backend::Api);
    assert_eq!(
        config.twitter.credentials.bearer_token.as_deref(),
        Some("replace-me")
    );
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[output]\ndir = \"/tmp/poly\"\n\n[reddit]\nenabled = false\n\n[twitter]\nenabled = false").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.output.dir, std::path::PathBuf::from("/tmp/poly"));
    assert_eq!(config.orchestrator.max_retries, 3);
}

#[test]
fn test_missing_file_is_read_error() {
    let err = Config::load("/nonexistent/poly-signals.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_enabled_dump_without_path_is_fatal() {
    let err = Config::from_toml("[reddit]\nbackend = \"dump\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
