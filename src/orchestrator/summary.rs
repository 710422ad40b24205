//! End-of-run summary table

use super::manifest::{PairStatus, RunManifest, RunStatus};
use std::fmt;

/// Error messages are cut to this many characters in the table
const MAX_REASON: usize = 60;

/// One row of the summary
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub pair: String,
    pub status: PairStatus,
    pub records: u64,
    pub attempts: u32,
    pub reason: Option<String>,
}

/// Pair outcomes of a run, printable as a table
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,
    pub succeeded: usize,
    pub incomplete: usize,
    pub records: u64,
    /// Pairs that did not succeed
    pub rows: Vec<SummaryRow>,
    pub warnings: usize,
}

impl RunSummary {
    pub fn from_manifest(manifest: &RunManifest) -> Self {
        let rows: Vec<SummaryRow> = manifest
            .incomplete()
            .map(|(key, pair)| SummaryRow {
                pair: key.to_string(),
                status: pair.status,
                records: pair.records,
                attempts: pair.attempts,
                reason: pair.error.clone(),
            })
            .collect();

        Self {
            status: manifest.status,
            succeeded: manifest.pairs.len() - rows.len(),
            incomplete: rows.len(),
            records: manifest.pairs.values().map(|p| p.records).sum(),
            rows,
            warnings: manifest.warnings.len(),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.status)?;
        writeln!(
            f,
            "  pairs: {} succeeded, {} incomplete; {} records; {} warnings",
            self.succeeded, self.incomplete, self.records, self.warnings
        )?;

        if self.rows.is_empty() {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(
            f,
            "  {:<32} {:<10} {:>8} {:>8}  {}",
            "PAIR", "STATUS", "RECORDS", "ATTEMPTS", "REASON"
        )?;
        writeln!(f, "  {}", "-".repeat(90))?;
        for row in &self.rows {
            writeln!(
                f,
                "  {:<32} {:<10} {:>8} {:>8}  {}",
                truncate(&row.pair, 32),
                row.status.as_str(),
                row.records,
                row.attempts,
                row.reason
                    .as_deref()
                    .map(|r| truncate(r, MAX_REASON))
                    .unwrap_or_default()
            )?;
        }
        Ok(())
    }
}
