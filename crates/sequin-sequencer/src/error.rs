//! Error types for the sequencer.

use sequin_queue::QueueError;
use sequin_trees::TreeError;
use sequin_types::CodecError;

/// Errors from building an epoch.
///
/// Everything except [`PartialCommit`](Self::PartialCommit) is transient:
/// the epoch aborts without writing, the mutations stay claimable, and the
/// next tick retries. A partial commit means the map advanced but the log
/// anchor failed — the driver surfaces it at fatal severity and the
/// initializer reconciles on the next boot.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    /// The map server failed or was unreachable.
    #[error("map server error: {0}")]
    Map(#[source] TreeError),

    /// The log server failed or was unreachable.
    #[error("log server error: {0}")]
    Log(#[source] TreeError),

    /// The mutation source transaction failed.
    #[error("mutation source error: {0}")]
    Queue(#[from] QueueError),

    /// Serializing the map root for anchoring failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The epoch deadline elapsed during the named operation.
    #[error("epoch deadline exceeded during {0}")]
    Deadline(&'static str),

    /// The map advanced to a new revision but anchoring it into the log
    /// failed even after a retry. The directory is in a
    /// consistency-threatening state until the anchor is re-queued.
    #[error("map advanced to revision {revision} but log anchoring failed: {source}")]
    PartialCommit {
        /// The un-anchored map revision.
        revision: i64,
        /// The underlying log failure.
        #[source]
        source: TreeError,
    },
}
