//! Durable queue store
//!
//! Two files back the in-memory delivery queue:
//! - an append-only log, one JSON `QueuedMessage` per line, written every
//!   time a message is queued
//! - a snapshot, a JSON array holding the whole queue, rewritten by
//!   compaction which then truncates the log
//!
//! Together they always hold at least what the in-memory queue held at the
//! last successful write. Delivered messages linger on disk until the next
//! compaction, so a restart may replay them (at-least-once).
//!
//! All file access goes through one lock so that an append can never fall
//! between the snapshot write and the log truncation of a compaction.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::StorageSettings;
use crate::producer::message::QueuedMessage;
use crate::utils::Result;

/// Outcome of scanning the append log.
#[derive(Debug, Default)]
pub struct LogScan {
    pub messages: Vec<QueuedMessage>,
    /// Lines that failed to parse and were ignored.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct QueueStore {
    snapshot_path: PathBuf,
    log_path: PathBuf,
    fsync: bool,
    io_lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(snapshot_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            log_path: log_path.into(),
            fsync,
            io_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.snapshot_path(), settings.log_path(), settings.fsync)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // the guarded data is `()`, a poisoned lock carries no broken state
        self.io_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the data directory and both files if they are missing.
    /// Existing files are left untouched.
    pub fn ensure(&self) -> Result<()> {
        let _guard = self.lock();

        for path in [&self.snapshot_path, &self.log_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.snapshot_path)
        {
            Ok(mut file) => file.write_all(b"[]")?,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        Ok(())
    }

    /// Append one record to the log. The write is flushed (and synced when
    /// configured) before this returns.
    pub fn append_sync(&self, msg: &QueuedMessage) -> Result<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');

        let _guard = self.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(&line)?;
        file.flush()?;
        if self.fsync {
            file.sync_data()?;
        }

        debug!(topic = %msg.topic, path = %self.log_path.display(), "appended 1 record to queue log");
        Ok(())
    }

    /// Same as [`append_sync`](Self::append_sync), run on the blocking pool.
    pub async fn append(self: &Arc<Self>, msg: QueuedMessage) -> Result<()> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.append_sync(&msg)).await?
    }

    /// Read the snapshot. A missing, empty or unparseable snapshot reads as
    /// an empty queue.
    pub fn read_snapshot(&self) -> Vec<QueuedMessage> {
        let content = match fs::read_to_string(&self.snapshot_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.snapshot_path.display(), "failed to read queue snapshot: {e}");
                return Vec::new();
            }
        };

        if content.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str(&content) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(path = %self.snapshot_path.display(), "ignoring corrupt queue snapshot: {e}");
                Vec::new()
            }
        }
    }

    /// Parse the append log line by line. Blank lines are ignored, lines
    /// that do not parse are counted and skipped.
    pub fn scan_log(&self) -> LogScan {
        let raw = match fs::read(&self.log_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return LogScan::default(),
            Err(e) => {
                warn!(path = %self.log_path.display(), "failed to read queue log: {e}");
                return LogScan::default();
            }
        };

        let mut scan = LogScan::default();
        for line in raw.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<QueuedMessage>(line) {
                Ok(msg) => scan.messages.push(msg),
                Err(_) => scan.skipped += 1,
            }
        }
        scan
    }

    /// Startup recovery: snapshot contents first, then every valid log
    /// record. A record present in both comes back twice.
    pub fn load(&self) -> Vec<QueuedMessage> {
        let _guard = self.lock();

        let mut messages = self.read_snapshot();
        if !messages.is_empty() {
            info!("Loaded {} messages from persisted queue", messages.len());
        }

        let scan = self.scan_log();
        if !scan.messages.is_empty() {
            info!("Loaded {} messages from queue log", scan.messages.len());
        }
        if scan.skipped > 0 {
            warn!(skipped = scan.skipped, "skipped malformed queue log lines");
        }
        messages.extend(scan.messages);
        messages
    }

    /// Rewrite the snapshot with whatever `contents` returns and truncate the
    /// log. `contents` runs while the store lock is held, so it sees every
    /// message whose log append completed before the truncation.
    ///
    /// Returns the number of messages in the new snapshot.
    pub fn compact_with<F>(&self, contents: F) -> Result<usize>
    where
        F: FnOnce() -> Vec<QueuedMessage>,
    {
        let _guard = self.lock();
        let messages = contents();

        let tmp_path = self.tmp_snapshot_path();
        {
            let mut tmp = File::create(&tmp_path)?;
            serde_json::to_writer_pretty(&mut tmp, &messages)?;
            tmp.flush()?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.snapshot_path)?;

        let log = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.log_path)?;
        if self.fsync {
            log.sync_all()?;
        }

        debug!(remaining = messages.len(), "compacted queue log into snapshot");
        Ok(messages.len())
    }

    fn tmp_snapshot_path(&self) -> PathBuf {
        let mut name: OsString = self.snapshot_path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
