//! Append-only staging files for in-progress pairs
//!
//! Each page of normalized records is appended and synced before the pair's
//! checkpoint is advanced in the manifest. After a crash the staging file may
//! hold records of a page that is fetched again on resume; consumers dedup on
//! finalize.

use super::writer::read_jsonl;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append records as JSON lines and sync them to disk
    pub fn append<T: Serialize>(&self, records: &[T]) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()
    }

    /// Every record staged so far, in append order
    pub fn load<T: DeserializeOwned>(&self) -> io::Result<Vec<T>> {
        read_jsonl(&self.path)
    }

    /// Remove the file; a missing file is not an error
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_preserves_order() {
        let dir = tempdir().unwrap();
        let staging = StagingFile::new(dir.path().join(".staging/reddit_m1.jsonl"));

        staging.append(&[1u32, 2]).unwrap();
        staging.append(&[3u32]).unwrap();
        staging.append::<u32>(&[]).unwrap();

        let back: Vec<u32> = staging.load().unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let staging = StagingFile::new(dir.path().join("pair.jsonl"));

        staging.clear().unwrap();
        staging.append(&["x"]).unwrap();
        assert!(staging.exists());
        staging.clear().unwrap();
        assert!(!staging.exists());
        assert!(staging.load::<String>().unwrap().is_empty());
    }
}
