//! Error types for the mutation source.

/// Errors from the mutation queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Could not begin a transaction.
    #[error("transaction begin failed: {0}")]
    Begin(String),

    /// A read inside the transaction failed.
    #[error("queue read failed: {0}")]
    Read(String),

    /// The transaction commit failed; the read mutations stay claimable.
    #[error("transaction commit failed: {0}")]
    Commit(String),

    /// The transaction rollback failed.
    #[error("transaction rollback failed: {0}")]
    Rollback(String),
}
