//! Directory scanning and incremental re-reading of session logs
//!
//! The scanner walks a data directory for `.jsonl` files and parses them
//! serially; files that fail to open are skipped and the walk continues.
//! The incremental reader resumes each changed file from its last known
//! byte offset. Both check a shared cancel flag between files so the engine
//! can abandon superseded work.

use crate::parser::{self, ParseResult};
use crate::types::UsageEntry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// Buffer size for file readers
const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Cooperative cancellation flag shared with in-flight scan jobs
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a fresh, un-cancelled flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A file that has grown (or been truncated) since the last read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path to the `.jsonl` file
    pub path: PathBuf,
    /// Byte offset to resume reading from
    pub offset: u64,
}

/// Result of a full scan
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// All parsed entries, in file-walk order
    pub entries: Vec<UsageEntry>,
    /// End-of-file offsets recorded per parsed file
    pub offsets: HashMap<PathBuf, u64>,
    /// Skipped-record count across all files
    pub skipped: usize,
    /// Error count across all files
    pub errored: usize,
}

/// Walk `data_dir` depth-first, parse every `.jsonl` file and record the
/// position each file was read up to.
pub fn scan_and_parse(cancel: &CancelFlag, data_dir: &Path) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    for dent in WalkDir::new(data_dir).into_iter() {
        if cancel.is_cancelled() {
            break;
        }
        let dent = match dent {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().is_file() || !is_jsonl(dent.path()) {
            continue;
        }

        if let Some((result, end_offset)) = parse_file_from(dent.path(), 0) {
            outcome.skipped += result.skipped;
            outcome.errored += result.errored;
            outcome.entries.extend(result.entries);
            outcome.offsets.insert(dent.path().to_path_buf(), end_offset);
        }
    }

    debug!(
        files = outcome.offsets.len(),
        entries = outcome.entries.len(),
        skipped = outcome.skipped,
        errored = outcome.errored,
        "full scan complete"
    );
    outcome
}

/// Read only the new data from each changed file.
///
/// Returns the new entries and the updated end-of-file offsets. A file whose
/// recorded offset now lies past EOF is skipped without an offset entry; the
/// watcher's truncation detection reschedules it from zero.
pub fn parse_incremental(
    cancel: &CancelFlag,
    changes: &[FileChange],
) -> (Vec<UsageEntry>, HashMap<PathBuf, u64>) {
    let mut entries = Vec::new();
    let mut new_offsets = HashMap::with_capacity(changes.len());

    for change in changes {
        if cancel.is_cancelled() {
            break;
        }
        if let Some((result, end_offset)) = parse_file_from(&change.path, change.offset) {
            entries.extend(result.entries);
            new_offsets.insert(change.path.clone(), end_offset);
        }
    }

    (entries, new_offsets)
}

/// Walk `data_dir` and report every `.jsonl` file that is unknown to
/// `offsets` or has grown past its recorded offset. Shrunk files are left to
/// the watcher's truncation detection.
pub fn detect_changes(
    cancel: &CancelFlag,
    data_dir: &Path,
    offsets: &HashMap<PathBuf, u64>,
) -> Vec<FileChange> {
    let mut changes = Vec::new();

    for dent in WalkDir::new(data_dir).into_iter() {
        if cancel.is_cancelled() {
            break;
        }
        let dent = match dent {
            Ok(d) => d,
            Err(_) => continue,
        };
        if !dent.file_type().is_file() || !is_jsonl(dent.path()) {
            continue;
        }
        let size = match dent.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        let recorded = offsets.get(dent.path()).copied();
        if recorded.is_none() || size > recorded.unwrap_or(0) {
            changes.push(FileChange {
                path: dent.path().to_path_buf(),
                offset: recorded.unwrap_or(0),
            });
        }
    }

    changes
}

/// Open a file, seek to `offset`, parse to EOF and report the end position.
/// Returns `None` when the file cannot be read or the offset is past EOF.
fn parse_file_from(path: &Path, offset: u64) -> Option<(ParseResult, u64)> {
    let file = File::open(path).ok()?;
    if offset > 0 {
        let len = file.metadata().ok()?.len();
        if offset > len {
            return None;
        }
    }

    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
    if offset > 0 {
        reader.seek(SeekFrom::Start(offset)).ok()?;
    }

    let project_path = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let result = parser::parse_reader(&mut reader, &project_path);
    let end_offset = reader.stream_position().ok()?;

    Some((result, end_offset))
}

fn is_jsonl(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}
