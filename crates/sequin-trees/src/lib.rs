//! Clients for the verifiable map and the append-only log.
//!
//! The map and log services are external collaborators; the sequencer
//! consumes them through the [`MapClient`] and [`LogClient`] traits. Two
//! families of implementations live here:
//!
//! - [`MemoryMap`] / [`MemoryLog`] — in-process reference services used by
//!   tests and the daemon's memory mode.
//! - [`RemoteMap`] / [`RemoteLog`] — clients speaking length-prefixed
//!   postcard over iroh QUIC to a [`TreeService`] hosting the trees in
//!   another process.

mod error;
mod memory;
mod message;
mod remote;

use async_trait::async_trait;
use sequin_types::{
    LogLeaf, MapIndex, MapLeaf, MapLeafInclusion, MapRootMetadata, SignedLogRoot, SignedMapRoot,
};

pub use error::TreeError;
pub use memory::{MemoryLog, MemoryMap};
pub use message::{TreeRequest, TreeResponse};
pub use remote::{RemoteLog, RemoteMap, TREE_ALPN, TreeService, TreeTransport};

/// Sentinel revision meaning "the latest revision".
pub const LATEST_REVISION: i64 = -1;

/// Client interface to the verifiable (sparse Merkle) map.
#[async_trait]
pub trait MapClient: Send + Sync {
    /// Fetch the signed root of the latest map revision.
    async fn get_signed_map_root(&self) -> Result<SignedMapRoot, TreeError>;

    /// Fetch leaves (with inclusion proofs) for `indexes` at `revision`.
    /// Pass [`LATEST_REVISION`] for the current head. Never-written indexes
    /// come back with an empty leaf value.
    async fn get_leaves(
        &self,
        indexes: &[MapIndex],
        revision: i64,
    ) -> Result<Vec<MapLeafInclusion>, TreeError>;

    /// Write a new revision containing `leaves`, carrying `metadata` inside
    /// the new signed root. Returns the new root.
    async fn set_leaves(
        &self,
        leaves: Vec<MapLeaf>,
        metadata: MapRootMetadata,
    ) -> Result<SignedMapRoot, TreeError>;
}

/// Client interface to the append-only verifiable log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Fetch the latest signed log head.
    async fn get_latest_signed_log_root(&self) -> Result<SignedLogRoot, TreeError>;

    /// Queue a leaf for inclusion. The log deduplicates by
    /// `leaf_identity_hash`, so re-queueing an already-anchored leaf is a
    /// no-op.
    async fn queue_leaf(&self, leaf: LogLeaf) -> Result<(), TreeError>;

    /// Fetch a consistency proof between two tree sizes.
    async fn get_consistency_proof(
        &self,
        first_tree_size: i64,
        second_tree_size: i64,
    ) -> Result<Vec<[u8; 32]>, TreeError>;

    /// Fetch an inclusion proof for the leaf at `leaf_index` under the root
    /// at `tree_size`.
    async fn get_inclusion_proof(
        &self,
        leaf_index: i64,
        tree_size: i64,
    ) -> Result<Vec<[u8; 32]>, TreeError>;
}
