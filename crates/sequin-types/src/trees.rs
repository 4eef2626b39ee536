//! Wire types for the verifiable map and the append-only log.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::MapIndex;
use crate::error::CodecError;

/// A single map leaf: an index and its serialized [`Entry`](crate::Entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLeaf {
    /// The 32-byte map index.
    pub index: MapIndex,
    /// Serialized entry, empty if the index has never been written.
    pub leaf_value: Vec<u8>,
}

/// A map leaf together with its inclusion proof under a specific root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLeafInclusion {
    /// The leaf.
    pub leaf: MapLeaf,
    /// Audit path hashes proving inclusion under the root the leaf was
    /// fetched at.
    pub inclusion: Vec<[u8; 32]>,
}

/// Metadata persisted inside each signed map root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapRootMetadata {
    /// The largest mutation sequence number absorbed into this revision.
    /// Non-decreasing across revisions.
    pub highest_fully_completed_seq: i64,
}

/// A signed commitment to the map's contents at one revision.
///
/// Field order is load-bearing: [`canonical_bytes`](Self::canonical_bytes)
/// serializes fields in declaration order and the result feeds the log's
/// identity hash. Reordering fields changes the hash of every future anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMapRoot {
    /// Identifier of the map tree.
    pub map_id: i64,
    /// Revision this root commits to. Revisions are dense; the sequencer is
    /// the sole writer.
    pub map_revision: i64,
    /// Root hash of the sparse Merkle map at this revision.
    pub root_hash: Vec<u8>,
    /// Time the revision was created, nanoseconds since the Unix epoch.
    pub timestamp_nanos: i64,
    /// Sequencer metadata carried inside the root.
    pub metadata: MapRootMetadata,
}

impl SignedMapRoot {
    /// The canonical serialization used to anchor this root into the log.
    ///
    /// JSON with fields in struct declaration order — stable across
    /// processes, which the log's identity-hash dedup depends on.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// `SHA-256(canonical_bytes)` — the log leaf identity hash for this root.
    pub fn identity_hash(&self) -> Result<[u8; 32], CodecError> {
        Ok(Sha256::digest(&self.canonical_bytes()?).into())
    }

    /// The root of a freshly created, never-written map.
    pub fn empty(map_id: i64) -> Self {
        Self {
            map_id,
            map_revision: 0,
            root_hash: Vec::new(),
            timestamp_nanos: 0,
            metadata: MapRootMetadata::default(),
        }
    }
}

/// The signed head of the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLogRoot {
    /// Identifier of the log tree.
    pub log_id: i64,
    /// Number of leaves in the log.
    pub tree_size: i64,
    /// Merkle root over the current leaves.
    pub root_hash: Vec<u8>,
    /// Time this head was produced, nanoseconds since the Unix epoch.
    pub timestamp_nanos: i64,
}

/// A leaf queued into the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLeaf {
    /// The leaf payload — a canonically serialized [`SignedMapRoot`].
    pub leaf_value: Vec<u8>,
    /// SHA-256 of `leaf_value`. The log deduplicates by this hash, which is
    /// what makes re-queueing an anchor after a crash safe.
    pub leaf_identity_hash: [u8; 32],
}

impl LogLeaf {
    /// Build the log leaf anchoring `smr`.
    pub fn for_map_root(smr: &SignedMapRoot) -> Result<Self, CodecError> {
        Ok(Self {
            leaf_value: smr.canonical_bytes()?,
            leaf_identity_hash: smr.identity_hash()?,
        })
    }
}
