//! Shared types for the Sequin key transparency sequencer.
//!
//! This crate defines the directory data model ([`Entry`], [`SignedKv`],
//! [`MapIndex`]), the tree wire types ([`SignedMapRoot`], [`SignedLogRoot`],
//! [`MapLeaf`], [`LogLeaf`]), the per-epoch summary handed to subscribers
//! ([`EpochSummary`]), and the [`Mutator`] seam through which signed updates
//! are validated and applied.

mod entry;
mod epoch;
mod error;
mod mutator;
mod trees;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use entry::{DigitallySigned, Entry, KeyValue, PublicKey, SignatureScheme, SignedKv};
pub use epoch::{EpochSummary, SequencedMutation};
pub use error::CodecError;
pub use mutator::{EntryMutator, Mutator, MutatorError};
pub use trees::{LogLeaf, MapLeaf, MapLeafInclusion, MapRootMetadata, SignedLogRoot, SignedMapRoot};

/// Width of a map index in bytes.
pub const INDEX_SIZE: usize = 32;

/// A 32-byte index into the verifiable map.
///
/// Indexes are VRF-derived by the directory front-end; the sequencer treats
/// them as opaque. Shorter inputs are zero-padded on the right when used as
/// a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MapIndex([u8; INDEX_SIZE]);

impl MapIndex {
    /// Build an index from arbitrary-length bytes, zero-padding to 32 bytes.
    ///
    /// Input longer than 32 bytes is truncated.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut index = [0u8; INDEX_SIZE];
        let n = bytes.len().min(INDEX_SIZE);
        index[..n].copy_from_slice(&bytes[..n]);
        Self(index)
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; INDEX_SIZE] {
        &self.0
    }
}

impl From<[u8; INDEX_SIZE]> for MapIndex {
    fn from(bytes: [u8; INDEX_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for MapIndex {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for MapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapIndex({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_from_slice_exact() {
        let bytes = [7u8; 32];
        let index = MapIndex::from_slice(&bytes);
        assert_eq!(index.as_bytes(), &bytes);
    }

    #[test]
    fn test_index_from_slice_zero_pads_short_input() {
        let index = MapIndex::from_slice(&[1, 2, 3]);
        let mut expected = [0u8; 32];
        expected[..3].copy_from_slice(&[1, 2, 3]);
        assert_eq!(index.as_bytes(), &expected);
    }

    #[test]
    fn test_index_from_slice_truncates_long_input() {
        let long = [9u8; 40];
        let index = MapIndex::from_slice(&long);
        assert_eq!(index.as_bytes(), &[9u8; 32]);
    }

    #[test]
    fn test_index_display_is_hex() {
        let index = MapIndex::from([0xabu8; 32]);
        assert_eq!(index.to_string(), "ab".repeat(32));
    }

    #[test]
    fn test_index_roundtrip_postcard() {
        let index = MapIndex::from_slice(b"some vrf output");
        let encoded = postcard::to_allocvec(&index).unwrap();
        let decoded: MapIndex = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(index, decoded);
    }
}
