//! Error types for tree clients.

/// Errors from the map or log services.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The service could not be reached or timed out. Transient: the epoch
    /// aborts and the next tick retries.
    #[error("tree service unavailable: {0}")]
    Unavailable(String),

    /// The requested map revision does not exist.
    #[error("unknown map revision {0}")]
    UnknownRevision(i64),

    /// The requested log leaf index is outside the given tree size.
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    LeafOutOfRange {
        /// The requested leaf index.
        index: i64,
        /// The tree size the proof was requested under.
        tree_size: i64,
    },

    /// An invalid consistency proof range was requested.
    #[error("invalid proof range: first size {first} not within (0, {second}]")]
    InvalidRange {
        /// First tree size.
        first: i64,
        /// Second tree size.
        second: i64,
    },

    /// Wire (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote service reported an error.
    #[error("remote tree error: {0}")]
    Remote(String),

    /// The remote service answered with the wrong response variant.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
