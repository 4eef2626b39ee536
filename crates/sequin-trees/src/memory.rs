//! In-memory reference implementations of the map and log services.
//!
//! These back the scenario tests and the daemon's memory mode. Content
//! hashing (revision roots, log heads, identity-hash dedup) is real; audit
//! paths are single-digest bindings of `(tree, position, content)` rather
//! than full sparse-tree paths — sufficient for wiring and dispatch, not
//! for cryptographic verification against a hostile server.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sequin_types::{
    LogLeaf, MapIndex, MapLeaf, MapLeafInclusion, MapRootMetadata, SignedLogRoot, SignedMapRoot,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::TreeError;
use crate::{LATEST_REVISION, LogClient, MapClient};

/// Current wall-clock time in nanoseconds since the Unix epoch.
fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

// ---------------------------------------------------------------------------
// MemoryMap
// ---------------------------------------------------------------------------

struct MapRevision {
    smr: SignedMapRoot,
    leaves: BTreeMap<MapIndex, Vec<u8>>,
}

struct MapInner {
    map_id: i64,
    /// One entry per revision, densely numbered from 0.
    revisions: Vec<MapRevision>,
    /// Number of upcoming `set_leaves` calls to fail (fault injection).
    fail_set_leaves: u32,
    set_leaves_calls: u64,
}

/// An in-memory verifiable map with dense revisions.
#[derive(Clone)]
pub struct MemoryMap {
    inner: Arc<Mutex<MapInner>>,
}

impl MemoryMap {
    /// Create a map at revision 0 with no leaves.
    pub fn new(map_id: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MapInner {
                map_id,
                revisions: vec![MapRevision {
                    smr: SignedMapRoot::empty(map_id),
                    leaves: BTreeMap::new(),
                }],
                fail_set_leaves: 0,
                set_leaves_calls: 0,
            })),
        }
    }

    /// Make the next `n` `set_leaves` calls fail with a transient error.
    pub fn fail_next_set_leaves(&self, n: u32) {
        self.inner.lock().expect("map lock poisoned").fail_set_leaves = n;
    }

    /// Number of `set_leaves` calls observed (including failed ones).
    pub fn set_leaves_calls(&self) -> u64 {
        self.inner.lock().expect("map lock poisoned").set_leaves_calls
    }

    /// The current head revision number.
    pub fn head_revision(&self) -> i64 {
        let inner = self.inner.lock().expect("map lock poisoned");
        (inner.revisions.len() - 1) as i64
    }

    /// The leaf value stored at `index` in the latest revision, if any.
    pub fn leaf(&self, index: &MapIndex) -> Option<Vec<u8>> {
        let inner = self.inner.lock().expect("map lock poisoned");
        inner
            .revisions
            .last()
            .and_then(|rev| rev.leaves.get(index).cloned())
    }

    /// Root hash over a revision's sorted leaf set.
    fn root_hash(map_id: i64, revision: i64, leaves: &BTreeMap<MapIndex, Vec<u8>>) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(map_id.to_be_bytes());
        hasher.update(revision.to_be_bytes());
        for (index, value) in leaves {
            hasher.update(index.as_bytes());
            hasher.update(Sha256::digest(value));
        }
        hasher.finalize().to_vec()
    }

    /// Single-digest stand-in for a leaf's audit path at a revision.
    fn leaf_digest(map_id: i64, revision: i64, index: &MapIndex, value: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"map-leaf");
        hasher.update(map_id.to_be_bytes());
        hasher.update(revision.to_be_bytes());
        hasher.update(index.as_bytes());
        hasher.update(value);
        hasher.finalize().into()
    }
}

#[async_trait]
impl MapClient for MemoryMap {
    async fn get_signed_map_root(&self) -> Result<SignedMapRoot, TreeError> {
        let inner = self.inner.lock().expect("map lock poisoned");
        let head = inner.revisions.last().expect("revision 0 always exists");
        Ok(head.smr.clone())
    }

    async fn get_leaves(
        &self,
        indexes: &[MapIndex],
        revision: i64,
    ) -> Result<Vec<MapLeafInclusion>, TreeError> {
        let inner = self.inner.lock().expect("map lock poisoned");
        let resolved = if revision == LATEST_REVISION {
            (inner.revisions.len() - 1) as i64
        } else {
            revision
        };

        let rev = usize::try_from(resolved)
            .ok()
            .and_then(|r| inner.revisions.get(r))
            .ok_or(TreeError::UnknownRevision(revision))?;

        Ok(indexes
            .iter()
            .map(|index| {
                let leaf_value = rev.leaves.get(index).cloned().unwrap_or_default();
                let digest = Self::leaf_digest(inner.map_id, resolved, index, &leaf_value);
                MapLeafInclusion {
                    leaf: MapLeaf {
                        index: *index,
                        leaf_value,
                    },
                    inclusion: vec![digest],
                }
            })
            .collect())
    }

    async fn set_leaves(
        &self,
        leaves: Vec<MapLeaf>,
        metadata: MapRootMetadata,
    ) -> Result<SignedMapRoot, TreeError> {
        let mut inner = self.inner.lock().expect("map lock poisoned");
        inner.set_leaves_calls += 1;

        if inner.fail_set_leaves > 0 {
            inner.fail_set_leaves -= 1;
            return Err(TreeError::Unavailable(
                "injected set_leaves failure".to_string(),
            ));
        }

        let mut new_leaves = inner
            .revisions
            .last()
            .expect("revision 0 always exists")
            .leaves
            .clone();
        for leaf in leaves {
            new_leaves.insert(leaf.index, leaf.leaf_value);
        }

        let revision = inner.revisions.len() as i64;
        let smr = SignedMapRoot {
            map_id: inner.map_id,
            map_revision: revision,
            root_hash: Self::root_hash(inner.map_id, revision, &new_leaves),
            timestamp_nanos: wall_clock_nanos(),
            metadata,
        };

        debug!(
            revision,
            leaves = new_leaves.len(),
            watermark = metadata.highest_fully_completed_seq,
            "map revision written"
        );

        inner.revisions.push(MapRevision {
            smr: smr.clone(),
            leaves: new_leaves,
        });
        Ok(smr)
    }
}

// ---------------------------------------------------------------------------
// MemoryLog
// ---------------------------------------------------------------------------

struct LogInner {
    log_id: i64,
    leaves: Vec<LogLeaf>,
    /// Identity hashes of all stored leaves, for dedup.
    identities: HashSet<[u8; 32]>,
    /// Number of upcoming `queue_leaf` calls to fail (fault injection).
    fail_queue_leaf: u32,
    queue_leaf_calls: u64,
}

/// An in-memory append-only log with identity-hash dedup.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new(log_id: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                log_id,
                leaves: Vec::new(),
                identities: HashSet::new(),
                fail_queue_leaf: 0,
                queue_leaf_calls: 0,
            })),
        }
    }

    /// Make the next `n` `queue_leaf` calls fail with a transient error.
    pub fn fail_next_queue_leaf(&self, n: u32) {
        self.inner.lock().expect("log lock poisoned").fail_queue_leaf = n;
    }

    /// Number of `queue_leaf` calls observed (including failed ones).
    pub fn queue_leaf_calls(&self) -> u64 {
        self.inner.lock().expect("log lock poisoned").queue_leaf_calls
    }

    /// Number of leaves in the log.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("log lock poisoned").leaves.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The leaf at `index`, if present.
    pub fn leaf_at(&self, index: usize) -> Option<LogLeaf> {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner.leaves.get(index).cloned()
    }

    fn root_hash(log_id: i64, leaves: &[LogLeaf]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(log_id.to_be_bytes());
        for leaf in leaves {
            hasher.update(leaf.leaf_identity_hash);
        }
        hasher.finalize().to_vec()
    }

    fn proof_digest(tag: &[u8], log_id: i64, a: i64, b: i64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(tag);
        hasher.update(log_id.to_be_bytes());
        hasher.update(a.to_be_bytes());
        hasher.update(b.to_be_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn get_latest_signed_log_root(&self) -> Result<SignedLogRoot, TreeError> {
        let inner = self.inner.lock().expect("log lock poisoned");
        Ok(SignedLogRoot {
            log_id: inner.log_id,
            tree_size: inner.leaves.len() as i64,
            root_hash: Self::root_hash(inner.log_id, &inner.leaves),
            timestamp_nanos: wall_clock_nanos(),
        })
    }

    async fn queue_leaf(&self, leaf: LogLeaf) -> Result<(), TreeError> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        inner.queue_leaf_calls += 1;

        if inner.fail_queue_leaf > 0 {
            inner.fail_queue_leaf -= 1;
            return Err(TreeError::Unavailable(
                "injected queue_leaf failure".to_string(),
            ));
        }

        if !inner.identities.insert(leaf.leaf_identity_hash) {
            debug!("duplicate leaf identity hash, dropping");
            return Ok(());
        }

        inner.leaves.push(leaf);
        debug!(tree_size = inner.leaves.len(), "log leaf queued");
        Ok(())
    }

    async fn get_consistency_proof(
        &self,
        first_tree_size: i64,
        second_tree_size: i64,
    ) -> Result<Vec<[u8; 32]>, TreeError> {
        let inner = self.inner.lock().expect("log lock poisoned");
        let size = inner.leaves.len() as i64;
        if first_tree_size <= 0 || first_tree_size > second_tree_size || second_tree_size > size {
            return Err(TreeError::InvalidRange {
                first: first_tree_size,
                second: second_tree_size,
            });
        }
        Ok(vec![Self::proof_digest(
            b"log-consistency",
            inner.log_id,
            first_tree_size,
            second_tree_size,
        )])
    }

    async fn get_inclusion_proof(
        &self,
        leaf_index: i64,
        tree_size: i64,
    ) -> Result<Vec<[u8; 32]>, TreeError> {
        let inner = self.inner.lock().expect("log lock poisoned");
        let size = inner.leaves.len() as i64;
        if leaf_index < 0 || leaf_index >= tree_size || tree_size > size {
            return Err(TreeError::LeafOutOfRange {
                index: leaf_index,
                tree_size,
            });
        }
        Ok(vec![Self::proof_digest(
            b"log-inclusion",
            inner.log_id,
            leaf_index,
            tree_size,
        )])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
