//! Offline dump reader
//!
//! Reads Pushshift-style Reddit dumps and Twitter datasets: line-delimited
//! JSON (optionally gzip or bzip2 compressed), JSON arrays and CSV. Files are
//! read in batches on a blocking thread. A [`DumpPosition`] records the file,
//! line and decoded byte offset of the next record so a page can be resumed
//! exactly: plain files by seeking, compressed ones by skipping the decoded
//! stream. JSON arrays are scanned one element at a time and CSV rows resume
//! from their byte position, so no format is ever held in memory whole.

use super::types::{CollectError, Cursor, DumpPosition, Page};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Bzip2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    /// One JSON document per line
    Lines,
    /// `.json`: either a JSON array or JSON lines
    Json,
    Csv,
}

/// Classify a dump file by its extensions, `None` when unsupported
fn classify(path: &Path) -> Option<(Compression, Format)> {
    let ext = |p: &Path| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    };

    let outer = ext(path)?;
    let (compression, inner) = match outer.as_str() {
        "gz" => (Compression::Gzip, path.file_stem().map(Path::new).and_then(ext)),
        "bz2" => (Compression::Bzip2, path.file_stem().map(Path::new).and_then(ext)),
        _ => (Compression::None, Some(outer.clone())),
    };

    let format = match inner.as_deref() {
        Some("csv") => Format::Csv,
        Some("json") => Format::Json,
        Some("jsonl" | "ndjson") => Format::Lines,
        // Pushshift monthly files: RS_2024-01.bz2, RC_2024-01.gz
        _ if compression != Compression::None => Format::Lines,
        _ => return None,
    };
    Some((compression, format))
}

/// The sorted set of dump files under a path
#[derive(Debug, Clone)]
pub struct DumpSet {
    root: PathBuf,
    files: Arc<Vec<PathBuf>>,
}

impl DumpSet {
    /// Open a single dump file or every supported file in a directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CollectError> {
        let root = path.as_ref().to_path_buf();
        let meta = std::fs::metadata(&root).map_err(|e| {
            CollectError::Source(format!("dump path {} unreadable: {e}", root.display()))
        })?;

        let mut files = Vec::new();
        if meta.is_dir() {
            for entry in std::fs::read_dir(&root)? {
                let path = entry?.path();
                if path.is_file() && classify(&path).is_some() {
                    files.push(path);
                }
            }
            files.sort();
        } else if classify(&root).is_some() {
            files.push(root.clone());
        } else {
            return Err(CollectError::Source(format!(
                "unsupported dump file: {}",
                root.display()
            )));
        }

        tracing::debug!(root = %root.display(), files = files.len(), "Opened dump set");

        Ok(Self {
            root,
            files: Arc::new(files),
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Identity of the dump set, stored in checkpoints
    pub fn fingerprint(&self) -> String {
        format!("dump:{}:{}", self.root.display(), self.files.len())
    }

    /// Check that a stored position still refers to the same file
    pub fn validate(&self, pos: &DumpPosition) -> Result<(), CollectError> {
        let Some(path) = self.files.get(pos.file_index) else {
            return Err(CollectError::ResumeMismatch(format!(
                "dump file #{} no longer exists",
                pos.file_index
            )));
        };
        if *path != pos.file {
            return Err(CollectError::ResumeMismatch(format!(
                "dump file #{} is now {} (checkpoint has {})",
                pos.file_index,
                path.display(),
                pos.file.display()
            )));
        }

        let len = std::fs::metadata(path)
            .map_err(|e| CollectError::ResumeMismatch(format!("{}: {e}", path.display())))?
            .len();
        if matches!(classify(path), Some((Compression::None, _))) && len < pos.byte_offset {
            return Err(CollectError::ResumeMismatch(format!(
                "{} shrank below checkpoint offset {}",
                path.display(),
                pos.byte_offset
            )));
        }
        Ok(())
    }

    /// Read up to `batch` records starting at `cursor`
    pub async fn read_page(&self, cursor: &Cursor, batch: usize) -> Result<Page, CollectError> {
        let position = match cursor {
            Cursor::Start => match self.files.first() {
                Some(file) => DumpPosition {
                    file_index: 0,
                    file: file.clone(),
                    line: 0,
                    byte_offset: 0,
                },
                None => return Ok(Page::last(Vec::new())),
            },
            Cursor::Dump(pos) => {
                self.validate(pos)?;
                pos.clone()
            }
            other => {
                return Err(CollectError::ResumeMismatch(format!(
                    "cursor {other:?} is not a dump position"
                )))
            }
        };

        let files = Arc::clone(&self.files);
        let batch = batch.max(1);
        tokio::task::spawn_blocking(move || read_batch(&files, position, batch))
            .await
            .map_err(|e| CollectError::Source(format!("dump reader task failed: {e}")))?
    }
}

/// Records read from one file plus how far the read got
struct Batch {
    records: Vec<Value>,
    lines: u64,
    byte_offset: u64,
    eof: bool,
}

fn read_batch(files: &[PathBuf], pos: DumpPosition, batch: usize) -> Result<Page, CollectError> {
    let path = &pos.file;
    let (compression, format) = classify(path)
        .ok_or_else(|| CollectError::Source(format!("unsupported dump file: {}", path.display())))?;

    let read = match format {
        Format::Csv => read_csv(path, compression, &pos, batch)?,
        Format::Json if is_json_array(path, compression)? => {
            read_array(path, compression, &pos, batch)?
        }
        Format::Json | Format::Lines => read_lines(path, compression, &pos, batch)?,
    };

    let next = if !read.eof {
        Some(Cursor::Dump(DumpPosition {
            file_index: pos.file_index,
            file: pos.file.clone(),
            line: pos.line + read.lines,
            byte_offset: read.byte_offset,
        }))
    } else {
        files.get(pos.file_index + 1).map(|file| {
            Cursor::Dump(DumpPosition {
                file_index: pos.file_index + 1,
                file: file.clone(),
                line: 0,
                byte_offset: 0,
            })
        })
    };

    tracing::trace!(
        file = %path.display(),
        records = read.records.len(),
        eof = read.eof,
        "Read dump batch"
    );

    Ok(Page::new(read.records, next))
}

fn open_decoded(path: &Path, compression: Compression) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    Ok(match compression {
        Compression::None => Box::new(BufReader::new(file)),
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        Compression::Bzip2 => Box::new(BufReader::new(MultiBzDecoder::new(file))),
    })
}

/// Open `path` positioned `offset` bytes into its decoded stream
fn open_at(
    path: &Path,
    compression: Compression,
    offset: u64,
) -> Result<Box<dyn BufRead + Send>, CollectError> {
    if compression == Compression::None {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        return Ok(Box::new(BufReader::new(file)));
    }

    let mut reader = open_decoded(path, compression)?;
    let skipped = io::copy(&mut (&mut reader).take(offset), &mut io::sink())?;
    if skipped < offset {
        return Err(CollectError::ResumeMismatch(format!(
            "{} ends before checkpoint offset {offset}",
            path.display()
        )));
    }
    Ok(reader)
}

fn read_lines(
    path: &Path,
    compression: Compression,
    pos: &DumpPosition,
    batch: usize,
) -> Result<Batch, CollectError> {
    let mut reader = open_at(path, compression, pos.byte_offset)?;

    let mut records = Vec::with_capacity(batch);
    let mut lines = 0u64;
    let mut byte_offset = pos.byte_offset;
    let mut buf = Vec::new();
    let mut eof = false;

    while records.len() < batch {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            eof = true;
            break;
        }
        byte_offset += n as u64;
        lines += 1;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // unparseable lines are handed on as strings and rejected by normalization
        records.push(
            serde_json::from_str::<Value>(line).unwrap_or_else(|_| Value::String(line.to_string())),
        );
    }

    if !eof && reader.fill_buf()?.is_empty() {
        eof = true;
    }

    Ok(Batch {
        records,
        lines,
        byte_offset,
        eof,
    })
}

fn is_json_array(path: &Path, compression: Compression) -> Result<bool, CollectError> {
    let mut reader = open_decoded(path, compression)?;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(false);
        }
        let ws = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if ws < buf.len() {
            return Ok(buf[ws] == b'[');
        }
        let len = buf.len();
        reader.consume(len);
    }
}

/// Tracks nesting while scanning one top-level array element
#[derive(Debug, Default)]
struct ElementScan {
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl ElementScan {
    /// Feed one byte; `Some(more)` at the `,` or `]` that ends the element
    fn push(&mut self, b: u8) -> Option<bool> {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            return None;
        }
        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' if self.depth > 0 => self.depth -= 1,
            b',' if self.depth == 0 => return Some(true),
            b']' => return Some(false),
            _ => {}
        }
        None
    }
}

/// Consume leading whitespace and the opening `[`, returning the bytes consumed
fn skip_array_open<R: BufRead>(reader: &mut R) -> io::Result<u64> {
    let mut consumed = 0u64;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(consumed);
        }
        let ws = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if ws < buf.len() {
            let open = ws + usize::from(buf[ws] == b'[');
            reader.consume(open);
            return Ok(consumed + open as u64);
        }
        let len = buf.len();
        reader.consume(len);
        consumed += len as u64;
    }
}

/// Copy the next element's bytes into `element` and consume its delimiter
///
/// Returns the bytes consumed and whether another element follows.
fn next_element<R: BufRead>(reader: &mut R, element: &mut Vec<u8>) -> io::Result<(u64, bool)> {
    let mut scan = ElementScan::default();
    let mut consumed = 0u64;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok((consumed, false));
        }
        match buf.iter().enumerate().find_map(|(i, &b)| scan.push(b).map(|more| (i, more))) {
            Some((i, more)) => {
                element.extend_from_slice(&buf[..i]);
                reader.consume(i + 1);
                return Ok((consumed + i as u64 + 1, more));
            }
            None => {
                let len = buf.len();
                element.extend_from_slice(buf);
                reader.consume(len);
                consumed += len as u64;
            }
        }
    }
}

/// Read elements of a top-level JSON array without loading the whole array
fn read_array(
    path: &Path,
    compression: Compression,
    pos: &DumpPosition,
    batch: usize,
) -> Result<Batch, CollectError> {
    let mut reader = open_at(path, compression, pos.byte_offset)?;
    let mut byte_offset = pos.byte_offset;
    if byte_offset == 0 {
        byte_offset += skip_array_open(&mut reader)?;
    }

    let mut records = Vec::with_capacity(batch);
    let mut element = Vec::new();
    let mut eof = false;

    while records.len() < batch {
        element.clear();
        let (consumed, more) = next_element(&mut reader, &mut element)?;
        byte_offset += consumed;

        let text = String::from_utf8_lossy(&element);
        let text = text.trim();
        if !text.is_empty() {
            records.push(
                serde_json::from_str::<Value>(text)
                    .unwrap_or_else(|_| Value::String(text.to_string())),
            );
        }
        if !more {
            eof = true;
            break;
        }
    }

    Ok(Batch {
        lines: records.len() as u64,
        records,
        byte_offset,
        eof,
    })
}

fn csv_reader<R: Read>(input: R, has_headers: bool) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(has_headers)
        .from_reader(input)
}

/// Header row and the decoded offset of the first data row
fn csv_headers(
    path: &Path,
    compression: Compression,
) -> Result<(csv::StringRecord, u64), CollectError> {
    let mut reader = csv_reader(open_decoded(path, compression)?, true);
    let headers = reader
        .headers()
        .map_err(|e| CollectError::Source(format!("{}: unreadable CSV header: {e}", path.display())))?
        .clone();
    Ok((headers, reader.position().byte()))
}

fn csv_row(headers: &csv::StringRecord, row: &csv::StringRecord) -> Value {
    let object: Map<String, Value> = headers
        .iter()
        .zip(row.iter())
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    Value::Object(object)
}

/// Read CSV rows from the checkpointed byte offset onward
fn read_csv(
    path: &Path,
    compression: Compression,
    pos: &DumpPosition,
    batch: usize,
) -> Result<Batch, CollectError> {
    let (headers, body_start) = csv_headers(path, compression)?;
    let start = pos.byte_offset.max(body_start);
    let mut reader = csv_reader(open_at(path, compression, start)?, false);

    let mut row = csv::StringRecord::new();
    let mut records = Vec::with_capacity(batch);
    let mut eof = false;

    while records.len() < batch {
        match reader.read_record(&mut row) {
            Ok(true) => records.push(csv_row(&headers, &row)),
            Ok(false) => {
                eof = true;
                break;
            }
            Err(e) if e.is_io_error() => {
                return Err(CollectError::Source(format!("{}: {e}", path.display())))
            }
            Err(e) => records.push(Value::String(format!("unreadable CSV row: {e}"))),
        }
    }

    let byte_offset = start + reader.position().byte();
    if !eof {
        eof = matches!(reader.read_record(&mut row), Ok(false));
    }

    Ok(Batch {
        lines: records.len() as u64,
        records,
        byte_offset,
        eof,
    })
}
