//! On-disk layout of a collection run

use crate::collector::SourceKind;
use std::path::{Path, PathBuf};

pub const MARKETS_FILE: &str = "markets.jsonl";
pub const PRICES_FILE: &str = "prices_history.jsonl";
pub const QUERY_SETS_FILE: &str = "query_sets.json";
pub const WINDOWS_FILE: &str = "windows.json";
pub const MANIFEST_FILE: &str = "run_manifest.json";
pub const STAGING_DIR: &str = ".staging";

/// Resolves every output path under the configured output directory
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output, per-source and staging directories
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.social_dir(SourceKind::Reddit))?;
        std::fs::create_dir_all(self.social_dir(SourceKind::Twitter))?;
        std::fs::create_dir_all(self.staging_dir())?;
        Ok(())
    }

    pub fn markets(&self) -> PathBuf {
        self.root.join(MARKETS_FILE)
    }

    pub fn prices_history(&self) -> PathBuf {
        self.root.join(PRICES_FILE)
    }

    pub fn query_sets(&self) -> PathBuf {
        self.root.join(QUERY_SETS_FILE)
    }

    pub fn windows(&self) -> PathBuf {
        self.root.join(WINDOWS_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn social_dir(&self, source: SourceKind) -> PathBuf {
        self.root.join(source.as_str())
    }

    /// `reddit/market_<id>_reddit.csv`, `twitter/market_<id>_twitter.csv`
    pub fn social_csv(&self, source: SourceKind, market_id: &str) -> PathBuf {
        self.social_dir(source).join(format!(
            "market_{}_{}.csv",
            file_safe(market_id),
            source.as_str()
        ))
    }

    pub fn positions(&self, address: &str) -> PathBuf {
        self.root.join(format!("positions_{}.jsonl", file_safe(address)))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Append-only staging file of an in-progress pair
    pub fn staging(&self, pair: &str) -> PathBuf {
        self.staging_dir().join(format!("{}.jsonl", file_safe(pair)))
    }
}

/// Replace characters that are unsafe in file names
///
/// Market ids are hex condition ids or numeric Gamma ids in practice, but
/// pair keys contain `:`.
pub fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
