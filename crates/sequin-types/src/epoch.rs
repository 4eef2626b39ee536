//! The per-epoch summary streamed to subscribers.

use serde::{Deserialize, Serialize};

use crate::entry::SignedKv;
use crate::trees::{MapLeafInclusion, SignedLogRoot, SignedMapRoot};

/// One mutation as it appears in an epoch summary: the signed update paired
/// with the inclusion proof of the pre-mutation leaf at the prior revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedMutation {
    /// The signed update, exactly as read from the mutation source.
    pub update: SignedKv,
    /// Inclusion proof for this update's index under the prior map root.
    pub proof: MapLeafInclusion,
}

/// Everything a subscriber needs to verify and replay one epoch.
///
/// The consistency proof is intentionally empty (first tree size pinned to
/// zero): consistency against a previously seen log root is a per-observer
/// concern, and observers recompute it against their own trusted size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// The revision this epoch produced.
    pub epoch: i64,
    /// The new signed map root.
    pub smr: SignedMapRoot,
    /// The log head after anchoring `smr`.
    pub log_root: SignedLogRoot,
    /// Log consistency proof hashes (always empty, see above).
    pub log_consistency: Vec<[u8; 32]>,
    /// Log inclusion proof hashes for the anchored root.
    pub log_inclusion: Vec<[u8; 32]>,
    /// The mutations absorbed into this epoch, in source sequence order.
    pub mutations: Vec<SequencedMutation>,
}
