//! Pending "open this" requests
//!
//! Producers are the command line, forwarded launches from other instances and
//! desktop open events. The UI thread is the only consumer.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keystone_core::prelude::*;
use keystone_core::OpenQueueEntry;

/// Multi-producer, single-consumer queue of open requests.
#[derive(Debug, Default)]
pub struct FileOpenQueue {
    entries: Mutex<VecDeque<OpenQueueEntry>>,
    draining: AtomicBool,
}

impl FileOpenQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<OpenQueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: impl Into<OpenQueueEntry>) {
        let entry = entry.into();
        trace!("Queued open request: {}", entry);
        self.entries().push_back(entry);
    }

    /// Push several paths in order, as one producer
    pub fn push_paths<I>(&self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.entries()
            .extend(paths.into_iter().map(OpenQueueEntry::FilePath));
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Hand every entry queued before this call to `open`, in push order.
    ///
    /// Entries pushed while draining wait for the next drain. A drain started
    /// while another is running (for example from inside `open`) does nothing
    /// and returns 0.
    pub fn drain<F>(&self, mut open: F) -> usize
    where
        F: FnMut(OpenQueueEntry),
    {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Open queue drain already in progress; skipping");
            return 0;
        }
        let _reset = DrainGuard(&self.draining);

        let batch = std::mem::take(&mut *self.entries());
        let count = batch.len();
        for entry in batch {
            open(entry);
        }
        if count > 0 {
            debug!("Drained {} open request(s)", count);
        }
        count
    }
}

/// Clears the draining flag even if the consumer panics
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
