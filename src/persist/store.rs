//! Append-Only Persistent Store
//!
//! The durable half of a shard. Records are single lines of
//! `<key><SP><value><LF>`; every write appends, so the most recent record
//! for a key is the authoritative one. Three structures cooperate:
//!
//! - the **data file**, only ever appended to by the foreground
//! - the **offset trie**, mapping each key to its newest record
//! - the **counting filter**, short-circuiting reads for keys that were
//!   never written
//!
//! Deletion tombstones the trie and decrements the filter; the record stays
//! on disk until the background [`Compactor`] rewrites the file with only
//! the live records and atomically renames it into place. On startup the
//! data file is scanned end to end and the in-memory structures are rebuilt,
//! later records winning.
//!
//! The trie, filter, and file handle share one mutex. The store sits off the
//! cache-hit read path, so holding the lock across file I/O is an accepted
//! cost.
//!
//! Keys and values must not contain the separator space or the terminator
//! newline; such inserts are rejected rather than corrupting the file.

use crate::persist::filter::{CountingFilter, DEFAULT_FILTER_SIZE};
use crate::persist::trie::OffsetTrie;
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors produced by the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key or value contains the record separator or terminator byte
    #[error("key or value contains a reserved byte (space or newline)")]
    ReservedByte,
}

/// In-memory state guarded by the store mutex.
struct StoreInner {
    index: OffsetTrie,
    filter: CountingFilter,
    file: File,
}

/// A persistent key-value store backed by an append-only file.
pub struct PersistentStore {
    inner: Mutex<StoreInner>,
    data_path: PathBuf,
    temp_path: PathBuf,
    /// Writes since the last successful compaction cycle
    dirty: AtomicU64,
}

impl PersistentStore {
    /// Opens (or creates) the store rooted at `base`. The live data lives in
    /// `<base>.txt`, compaction scratch in `<base>.temp.txt`. Any existing
    /// data file is scanned to rebuild the index and filter.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_filter_size(base, DEFAULT_FILTER_SIZE)
    }

    /// Opens the store with an explicit filter bucket count.
    pub fn open_with_filter_size(
        base: impl Into<PathBuf>,
        filter_size: usize,
    ) -> Result<Self, StoreError> {
        let base = base.into();
        let data_path = path_with_suffix(&base, ".txt");
        let temp_path = path_with_suffix(&base, ".temp.txt");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)?;

        let mut index = OffsetTrie::new();
        let mut filter = CountingFilter::new(filter_size);
        let recovered = rebuild_index(&mut file, &mut index, &mut filter)?;
        if recovered > 0 {
            info!(records = recovered, path = %data_path.display(), "Recovered persistent store");
        }

        Ok(Self {
            inner: Mutex::new(StoreInner {
                index,
                filter,
                file,
            }),
            data_path,
            temp_path,
            dirty: AtomicU64::new(0),
        })
    }

    /// Appends a record for `key` and makes it the authoritative one.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if has_reserved_byte(key) || has_reserved_byte(value) {
            return Err(StoreError::ReservedByte);
        }

        let mut inner = self.inner.lock().unwrap();
        let offset = inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(key)?;
        inner.file.write_all(b" ")?;
        inner.file.write_all(value)?;
        inner.file.write_all(b"\n")?;
        inner.file.flush()?;

        inner.index.insert(key, offset);
        inner.filter.insert(key);
        self.dirty.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Looks up the newest live record for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.filter.contains(key) {
            return Ok(None);
        }
        let Some(offset) = inner.index.search(key) else {
            return Ok(None);
        };

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&inner.file);
        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;

        let Some((stored_key, value)) = split_record(&line) else {
            return Ok(None);
        };
        // The index can only skew from the file through a bug or external
        // edit; a mismatched key reads as absent rather than wrong data.
        if stored_key != key {
            warn!(offset, "Stored key does not match index; treating as absent");
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(value)))
    }

    /// Tombstones `key`. Returns whether the key was live.
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let was_live = inner.index.remove(key);
        // Only a live key contributed a counter it should give back; a
        // blind decrement could starve a colliding live key.
        if was_live {
            inner.filter.remove(key);
            self.dirty.fetch_add(1, Ordering::Relaxed);
        }
        was_live
    }

    /// Number of writes since the last successful compaction.
    pub fn dirty_writes(&self) -> u64 {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Rewrites the data file with only the live records.
    ///
    /// A record survives when it is the one the index points at and its key
    /// is not tombstoned. The rewrite goes to the scratch file, which then
    /// atomically replaces the live file; the index is swapped for one built
    /// during the rewrite and the file handle re-opened. The filter is not
    /// rebuilt, so stale positives persist until keys are re-inserted.
    ///
    /// Returns the number of records kept.
    pub fn compact(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let mut temp = File::create(&self.temp_path)?;
        (&inner.file).seek(SeekFrom::Start(0))?;

        let mut fresh_index = OffsetTrie::new();
        let mut rewritten = 0usize;
        {
            let mut reader = BufReader::new(&inner.file);
            let mut offset: u64 = 0;
            let mut out_offset: u64 = 0;
            let mut line = Vec::new();
            loop {
                line.clear();
                let n = reader.read_until(b'\n', &mut line)?;
                if n == 0 {
                    break;
                }
                if line.last() != Some(&b'\n') {
                    // Torn tail from an interrupted write; drop it.
                    break;
                }
                if let Some((key, _)) = split_record(&line) {
                    if inner.index.search(key) == Some(offset) {
                        temp.write_all(&line)?;
                        fresh_index.insert(key, out_offset);
                        out_offset += n as u64;
                        rewritten += 1;
                    }
                }
                offset += n as u64;
            }
            temp.flush()?;
        }

        // The rename is the commit point: a crash before it leaves the old
        // file untouched, a crash after it leaves the compacted file live.
        std::fs::rename(&self.temp_path, &self.data_path)?;
        inner.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.data_path)?;
        inner.index = fresh_index;
        self.dirty.store(0, Ordering::Relaxed);
        Ok(rewritten)
    }

    /// Deletes the store's files from disk.
    pub fn destroy(&self) -> Result<(), StoreError> {
        let _ = std::fs::remove_file(&self.temp_path);
        std::fs::remove_file(&self.data_path)?;
        Ok(())
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("data_path", &self.data_path)
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

fn path_with_suffix(base: &PathBuf, suffix: &str) -> PathBuf {
    let mut os = base.clone().into_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

fn has_reserved_byte(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b == b' ' || b == b'\n')
}

/// Splits a raw record line into `(key, value)`, stripping the terminator.
fn split_record(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let body = line.strip_suffix(b"\n").unwrap_or(line);
    let sp = body.iter().position(|&b| b == b' ')?;
    Some((&body[..sp], &body[sp + 1..]))
}

/// Scans the data file in order and rebuilds the index and filter; later
/// records for the same key win. Returns the number of records observed.
fn rebuild_index(
    file: &mut File,
    index: &mut OffsetTrie,
    filter: &mut CountingFilter,
) -> Result<usize, StoreError> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);
    let mut offset: u64 = 0;
    let mut records = 0usize;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            warn!(offset, "Ignoring torn record at end of data file");
            break;
        }
        match split_record(&line) {
            Some((key, _)) => {
                index.insert(key, offset);
                filter.insert(key);
                records += 1;
            }
            None => {
                warn!(offset, "Skipping malformed record");
            }
        }
        offset += n as u64;
    }
    Ok(records)
}

/// Configuration for the background compaction task.
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    /// Sleep between compaction checks
    pub interval: Duration,

    /// Minimum writes since the last cycle before a rewrite is worthwhile
    pub min_dirty_writes: u64,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            min_dirty_writes: 100,
        }
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

/// A handle to the background compaction thread.
///
/// The thread wakes at a fixed cadence, skips the cycle when too few writes
/// have accumulated, and otherwise compacts the store. Dropping the handle
/// signals the thread and joins it.
pub struct Compactor {
    signal: Arc<StopSignal>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Compactor {
    /// Starts the compaction thread for `store`.
    pub fn start(store: Arc<PersistentStore>, config: CompactorConfig) -> Self {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::spawn(move || compaction_loop(store, config, thread_signal));

        info!("Background compactor started");
        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Signals the thread to stop and waits for it to finish.
    pub fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock().unwrap();
            if *stopped {
                return;
            }
            *stopped = true;
        }
        self.signal.cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("Background compactor stopped");
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn compaction_loop(store: Arc<PersistentStore>, config: CompactorConfig, signal: Arc<StopSignal>) {
    loop {
        let stopped = signal.stopped.lock().unwrap();
        let (stopped, _) = signal
            .cvar
            .wait_timeout(stopped, config.interval)
            .unwrap();
        if *stopped {
            return;
        }
        drop(stopped);

        if store.dirty_writes() < config.min_dirty_writes {
            continue;
        }
        match store.compact() {
            Ok(rewritten) => {
                debug!(rewritten, "Compaction cycle complete");
            }
            Err(e) => {
                // The rename either happened or it did not, so the live
                // file is intact; try again next interval.
                warn!(error = %e, "Compaction cycle failed");
            }
        }
    }
}
