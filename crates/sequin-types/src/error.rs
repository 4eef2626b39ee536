//! Error types for the sequin-types crate.

/// Errors from encoding or decoding directory values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Postcard (de)serialization of a stored value failed.
    #[error("value codec error: {0}")]
    Value(#[from] postcard::Error),

    /// Canonical JSON serialization of a map root failed.
    #[error("canonical root serialization error: {0}")]
    CanonicalRoot(#[from] serde_json::Error),
}
