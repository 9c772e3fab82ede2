//! Bounded in-memory buffer of pending log entries.
//!
//! Producers append under a mutex; the flush path drains the whole buffer in
//! one critical section, so an append is either fully inside a drained batch
//! or fully left for the next one. Closing takes the final batch under the
//! same lock, after which every append fails with `Closed`.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::LogTideError;
use crate::models::LogEntry;

/// Configuration for the log buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Number of entries that makes a batch ready
    pub batch_size: usize,

    /// Maximum number of entries held at once
    pub max_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_capacity: 10_000,
        }
    }
}

impl BufferConfig {
    pub fn new(batch_size: usize, max_capacity: usize) -> Self {
        Self {
            batch_size,
            max_capacity,
        }
    }
}

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Entries accepted into the buffer
    pub logs_received: u64,

    /// Entries handed out by `drain`
    pub logs_drained: u64,

    /// Entries refused because the buffer was full
    pub logs_rejected: u64,

    /// Non-empty drains
    pub drains: u64,
}

#[derive(Debug, Default)]
struct BufferInner {
    entries: Vec<LogEntry>,
    stats: BufferStats,
    closed: bool,
}

/// Thread-safe bounded log buffer.
#[derive(Debug)]
pub struct LogBuffer {
    config: BufferConfig,
    inner: Mutex<BufferInner>,
}

impl LogBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BufferInner {
                entries: Vec::with_capacity(config.batch_size),
                stats: BufferStats::default(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an entry.
    ///
    /// Returns `Ok(true)` when the buffer has reached the batch size and should
    /// be flushed. Fails with [`LogTideError::BufferFull`] at capacity; the
    /// entry is dropped and the caller is responsible for counting it.
    /// Fails with [`LogTideError::Closed`] once [`close`](Self::close) ran.
    pub fn append(&self, entry: LogEntry) -> Result<bool, LogTideError> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(LogTideError::Closed);
        }

        if inner.entries.len() >= self.config.max_capacity {
            inner.stats.logs_rejected += 1;
            return Err(LogTideError::BufferFull);
        }

        inner.entries.push(entry);
        inner.stats.logs_received += 1;
        Ok(inner.entries.len() >= self.config.batch_size)
    }

    /// Take every buffered entry, leaving the buffer empty.
    ///
    /// Returns `None` when there is nothing to send.
    pub fn drain(&self) -> Option<Vec<LogEntry>> {
        self.take(false)
    }

    /// Refuse further appends and take whatever is left.
    pub fn close(&self) -> Option<Vec<LogEntry>> {
        self.take(true)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn take(&self, close: bool) -> Option<Vec<LogEntry>> {
        let mut inner = self.lock();
        inner.closed |= close;
        if inner.entries.is_empty() {
            return None;
        }

        let capacity = if inner.closed { 0 } else { self.config.batch_size };
        let batch = std::mem::replace(&mut inner.entries, Vec::with_capacity(capacity));
        inner.stats.logs_drained += batch.len() as u64;
        inner.stats.drains += 1;

        debug!(batch_size = batch.len(), "Drained log buffer");
        Some(batch)
    }

    /// Get the current number of entries in the buffer.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats.clone()
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Copy of the buffered entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }
}
