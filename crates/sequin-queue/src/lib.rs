//! The mutation source consumed by the epoch builder.
//!
//! Pending mutations live in an external queue, ordered by monotonically
//! increasing sequence numbers. The sequencer only ever *reads* the queue,
//! inside a transaction: a read that commits leaves the mutations in place
//! (they are superseded by the watermark stored in the map root), while a
//! failed commit leaves them claimable by the next epoch.
//!
//! [`MemoryQueue`] is the in-process implementation used by tests and the
//! daemon's memory mode.

mod error;
mod memory;

use async_trait::async_trait;
use sequin_types::SignedKv;

pub use error::QueueError;
pub use memory::MemoryQueue;

/// Factory for read transactions against the mutation queue.
#[async_trait]
pub trait MutationSource: Send + Sync {
    /// Begin a new read transaction.
    async fn begin(&self) -> Result<Box<dyn SourceTxn>, QueueError>;
}

/// A single read transaction.
///
/// Exactly one of [`commit`](Self::commit) or [`rollback`](Self::rollback)
/// consumes the transaction.
#[async_trait]
pub trait SourceTxn: Send {
    /// Read all mutations with sequence number strictly greater than
    /// `start_seq`, bounded by the source's own page limit.
    ///
    /// Returns the highest sequence number in the batch and the batch in
    /// ascending sequence order. When nothing is pending, returns
    /// `(start_seq, [])`.
    async fn read_all(&mut self, start_seq: u64) -> Result<(u64, Vec<SignedKv>), QueueError>;

    /// Commit the transaction. A read-only commit is still required: an
    /// epoch whose read transaction fails to commit must abort.
    async fn commit(self: Box<Self>) -> Result<(), QueueError>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<(), QueueError>;
}
