//! In-memory mutation queue for tests and the daemon's memory mode.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sequin_types::SignedKv;
use tracing::debug;

use crate::{MutationSource, QueueError, SourceTxn};

/// Default page limit for a single transactional read.
const DEFAULT_PAGE_SIZE: usize = 1000;

struct QueueInner {
    /// Pending mutations keyed by sequence number. Sequences start at 1.
    entries: BTreeMap<u64, SignedKv>,
    /// Next sequence number to assign.
    next_seq: u64,
    /// Number of upcoming commits to fail (fault injection for tests).
    fail_commits: u32,
}

/// An ordered in-memory mutation queue.
///
/// Writers call [`push`](Self::push); the sequencer reads through the
/// [`MutationSource`] transaction interface. Entries are retained after a
/// committed read — the watermark inside the map root is what marks them
/// absorbed.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<QueueInner>>,
    page_size: usize,
}

impl MemoryQueue {
    /// Create a queue with the default page limit.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a queue with a specific page limit per read.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                entries: BTreeMap::new(),
                next_seq: 1,
                fail_commits: 0,
            })),
            page_size,
        }
    }

    /// Append a signed mutation, returning its assigned sequence number.
    pub fn push(&self, update: SignedKv) -> u64 {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(seq, update);
        debug!(seq, pending = inner.entries.len(), "queued mutation");
        seq
    }

    /// Make the next `n` transaction commits fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.lock().expect("queue lock poisoned").fail_commits = n;
    }

    /// Number of mutations currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").entries.len()
    }

    /// Whether the queue holds no mutations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MutationSource for MemoryQueue {
    async fn begin(&self) -> Result<Box<dyn SourceTxn>, QueueError> {
        Ok(Box::new(MemoryTxn {
            inner: self.inner.clone(),
            page_size: self.page_size,
        }))
    }
}

struct MemoryTxn {
    inner: Arc<Mutex<QueueInner>>,
    page_size: usize,
}

#[async_trait]
impl SourceTxn for MemoryTxn {
    async fn read_all(&mut self, start_seq: u64) -> Result<(u64, Vec<SignedKv>), QueueError> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let mut max_seq = start_seq;
        let mut batch = Vec::new();

        for (&seq, update) in inner.entries.range(start_seq + 1..) {
            if batch.len() >= self.page_size {
                break;
            }
            max_seq = seq;
            batch.push(update.clone());
        }

        Ok((max_seq, batch))
    }

    async fn commit(self: Box<Self>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.fail_commits > 0 {
            inner.fail_commits -= 1;
            return Err(QueueError::Commit("injected commit failure".to_string()));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), QueueError> {
        Ok(())
    }
}
