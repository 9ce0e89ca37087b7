//! Hybrid filesystem watcher for session logs
//!
//! Two change sources run concurrently over the same offset map: an
//! event-driven `notify` subscription on every directory below the roots,
//! and a periodic full poll. The poll is always active as the safety net for
//! dropped events and filesystems without notification support.
//!
//! Truncation (`current size < recorded offset`) resets the recorded offset
//! to zero and reports the file; it is the only case where the watcher
//! rewinds.

use crate::scanner::FileChange;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default interval for the polling safety net
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Granularity at which background threads observe the stop flag
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

type OffsetMap = Arc<Mutex<HashMap<PathBuf, u64>>>;

/// Watches root directories for growing `.jsonl` files
pub struct LogWatcher {
    dirs: Vec<PathBuf>,
    poll_interval: Duration,
    offsets: OffsetMap,
    tx: mpsc::Sender<Vec<FileChange>>,
    stop: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LogWatcher {
    /// Create a watcher over `dirs`, emitting change batches on `tx`.
    pub fn new(
        dirs: Vec<PathBuf>,
        poll_interval: Duration,
        tx: mpsc::Sender<Vec<FileChange>>,
    ) -> Self {
        Self {
            dirs,
            poll_interval,
            offsets: Arc::new(Mutex::new(HashMap::new())),
            tx,
            stop: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    /// Record that a file has been read up to `offset`.
    pub fn set_offset(&self, path: &Path, offset: u64) {
        self.offsets
            .lock()
            .expect("offset map poisoned")
            .insert(path.to_path_buf(), offset);
    }

    /// Install offsets wholesale, typically after a full scan.
    pub fn seed_offsets(&self, map: HashMap<PathBuf, u64>) {
        *self.offsets.lock().expect("offset map poisoned") = map;
    }

    /// Start the event subscription and the poll loop.
    pub fn start(&mut self) {
        // Event-driven source. Creation failures are non-fatal; the poller
        // still provides full coverage.
        let dirs = self.dirs.clone();
        let offsets = self.offsets.clone();
        let tx = self.tx.clone();
        let stop = self.stop.clone();
        self.tasks.push(tokio::task::spawn_blocking(move || {
            run_event_source(dirs, offsets, tx, stop);
        }));

        let dirs = self.dirs.clone();
        let offsets = self.offsets.clone();
        let tx = self.tx.clone();
        let stop = self.stop.clone();
        let poll_interval = self.poll_interval;
        self.tasks.push(tokio::task::spawn_blocking(move || {
            run_poll_source(dirs, offsets, tx, stop, poll_interval);
        }));
    }

    /// Signal both sources to exit and wait for them to finish.
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

fn run_event_source(
    dirs: Vec<PathBuf>,
    offsets: OffsetMap,
    tx: mpsc::Sender<Vec<FileChange>>,
    stop: Arc<AtomicBool>,
) {
    let event_offsets = offsets.clone();
    let event_tx = tx.clone();
    let watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let event = match result {
                Ok(e) => e,
                Err(_) => return,
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in &event.paths {
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                if let Some(change) = check_file(&event_offsets, path) {
                    let _ = event_tx.blocking_send(vec![change]);
                }
            }
        },
        Config::default(),
    );

    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            warn!("file watcher unavailable, poll only: {e}");
            return;
        }
    };

    for dir in &dirs {
        if dir.exists() {
            if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
                warn!("cannot watch {}: {e}", dir.display());
            }
        }
    }

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(STOP_CHECK_INTERVAL);
    }
    drop(watcher);
    debug!("event source stopped");
}

fn run_poll_source(
    dirs: Vec<PathBuf>,
    offsets: OffsetMap,
    tx: mpsc::Sender<Vec<FileChange>>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let mut next_poll = Instant::now() + poll_interval;
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if Instant::now() < next_poll {
            std::thread::sleep(STOP_CHECK_INTERVAL);
            continue;
        }
        next_poll = Instant::now() + poll_interval;

        let changes = poll_all(&dirs, &offsets);
        if !changes.is_empty() && tx.blocking_send(changes).is_err() {
            break;
        }
    }
    debug!("poll source stopped");
}

/// Compare one file's size against its recorded offset.
fn check_file(offsets: &OffsetMap, path: &Path) -> Option<FileChange> {
    let size = std::fs::metadata(path).ok()?.len();
    let mut map = offsets.lock().expect("offset map poisoned");
    let recorded = *map.entry(path.to_path_buf()).or_insert(0);

    if size < recorded {
        // Truncated: rewind to the beginning.
        map.insert(path.to_path_buf(), 0);
        return Some(FileChange {
            path: path.to_path_buf(),
            offset: 0,
        });
    }
    if size > recorded {
        return Some(FileChange {
            path: path.to_path_buf(),
            offset: recorded,
        });
    }
    None
}

/// Walk all roots and report every file whose size disagrees with its
/// recorded offset.
fn poll_all(dirs: &[PathBuf], offsets: &OffsetMap) -> Vec<FileChange> {
    let mut files = Vec::new();
    for dir in dirs {
        for dent in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !dent.file_type().is_file() {
                continue;
            }
            let path = dent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Ok(meta) = dent.metadata() {
                files.push((path.to_path_buf(), meta.len()));
            }
        }
    }

    let mut map = offsets.lock().expect("offset map poisoned");
    let mut changes = Vec::new();
    for (path, size) in files {
        let recorded = *map.entry(path.clone()).or_insert(0);
        if size < recorded {
            map.insert(path.clone(), 0);
            changes.push(FileChange { path, offset: 0 });
        } else if size > recorded {
            changes.push(FileChange {
                path,
                offset: recorded,
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_poll_reports_new_and_grown_files() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("p/session.jsonl");
        write_file(&log, "one line\n");

        let offsets: OffsetMap = Arc::new(Mutex::new(HashMap::new()));
        let dirs = vec![tmp.path().to_path_buf()];

        // Unknown file: registered at 0 and reported with offset 0
        let changes = poll_all(&dirs, &offsets);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].offset, 0);

        // Mark as fully read; no further changes
        let size = fs::metadata(&log).unwrap().len();
        offsets.lock().unwrap().insert(log.clone(), size);
        assert!(poll_all(&dirs, &offsets).is_empty());

        // Grow the file: reported from the recorded offset
        let mut f = fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(f, "another line").unwrap();
        drop(f);
        let changes = poll_all(&dirs, &offsets);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].offset, size);
    }

    #[test]
    fn test_poll_detects_truncation() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("p/session.jsonl");
        write_file(&log, "a longer original content\n");

        let offsets: OffsetMap = Arc::new(Mutex::new(HashMap::new()));
        offsets
            .lock()
            .unwrap()
            .insert(log.clone(), fs::metadata(&log).unwrap().len());

        // Truncate to something smaller
        write_file(&log, "tiny\n");

        let changes = poll_all(&[tmp.path().to_path_buf()], &offsets);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].offset, 0);
        assert_eq!(*offsets.lock().unwrap().get(&log).unwrap(), 0);
    }

    #[test]
    fn test_poll_ignores_non_jsonl() {
        let tmp = TempDir::new().unwrap();
        write_file(&tmp.path().join("p/notes.txt"), "hello\n");

        let offsets: OffsetMap = Arc::new(Mutex::new(HashMap::new()));
        assert!(poll_all(&[tmp.path().to_path_buf()], &offsets).is_empty());
    }

    #[test]
    fn test_check_file_registers_unknown() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("session.jsonl");
        write_file(&log, "data\n");

        let offsets: OffsetMap = Arc::new(Mutex::new(HashMap::new()));
        let change = check_file(&offsets, &log).unwrap();
        assert_eq!(change.offset, 0);
        assert!(offsets.lock().unwrap().contains_key(&log));
    }

    #[tokio::test]
    async fn test_watcher_lifecycle_emits_on_poll() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("p/session.jsonl");
        write_file(&log, "one line\n");

        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = LogWatcher::new(
            vec![tmp.path().to_path_buf()],
            Duration::from_millis(200),
            tx,
        );
        watcher.start();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poll should report the unknown file")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].path, log);
        assert_eq!(batch[0].offset, 0);

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_seed_offsets_suppresses_known_files() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("p/session.jsonl");
        write_file(&log, "one line\n");
        let size = fs::metadata(&log).unwrap().len();

        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = LogWatcher::new(
            vec![tmp.path().to_path_buf()],
            Duration::from_millis(100),
            tx,
        );
        watcher.seed_offsets(HashMap::from([(log.clone(), size)]));
        watcher.start();

        let outcome = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(outcome.is_err(), "fully read file must not be reported");

        watcher.stop().await;
    }
}
