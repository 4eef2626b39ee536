//! Scenario tests for the sequencer.

mod epoch_tests;

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use sequin_queue::MemoryQueue;
use sequin_trees::{MemoryLog, MemoryMap};
use sequin_types::{Entry, EntryMutator, PublicKey, SignedKv};
use tokio::time::Duration;

use crate::epoch::{Sequencer, SequencerConfig};
use crate::metrics::SequencerMetrics;

/// A sequencer wired to in-memory collaborators, with direct handles to
/// each for assertions and fault injection.
pub(crate) struct Harness {
    pub map: MemoryMap,
    pub log: MemoryLog,
    pub queue: MemoryQueue,
    pub metrics: Arc<SequencerMetrics>,
    pub sequencer: Sequencer,
}

pub(crate) fn harness() -> Harness {
    let map = MemoryMap::new(1);
    let log = MemoryLog::new(2);
    let queue = MemoryQueue::new();
    let metrics = Arc::new(SequencerMetrics::unregistered());

    let sequencer = Sequencer::new(
        SequencerConfig {
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
        },
        Arc::new(map.clone()),
        Arc::new(log.clone()),
        Arc::new(EntryMutator::new()),
        Arc::new(queue.clone()),
        metrics.clone(),
    );

    Harness {
        map,
        log,
        queue,
        metrics,
        sequencer,
    }
}

/// Deterministic signing key from a seed byte.
pub(crate) fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// 32-byte map key filled with `tag`.
pub(crate) fn key_bytes(tag: u8) -> Vec<u8> {
    vec![tag; 32]
}

fn entry_for(owner: &SigningKey, commitment: &[u8], previous: Vec<u8>) -> Entry {
    Entry {
        commitment: commitment.to_vec(),
        authorized_keys: vec![PublicKey::Ed25519(owner.verifying_key().to_bytes())],
        previous,
    }
}

fn update_for(key_tag: u8, entry: &Entry, signers: &[&SigningKey]) -> SignedKv {
    let mut update = SignedKv::new(key_bytes(key_tag), entry.to_leaf_value().unwrap());
    for (position, signer) in signers.iter().enumerate() {
        update
            .attach_ed25519(format!("key-{position}"), signer)
            .unwrap();
    }
    update
}

/// A valid first write at `key_tag`, owned by `owner`.
pub(crate) fn first_write(key_tag: u8, owner: &SigningKey) -> (Entry, SignedKv) {
    let entry = entry_for(owner, &[key_tag, 0], vec![]);
    let update = update_for(key_tag, &entry, &[owner]);
    (entry, update)
}

/// A valid follow-up write chaining from `prior`, transferring ownership
/// from `old` to `new` (pass the same key twice to keep the owner).
pub(crate) fn next_write(
    key_tag: u8,
    generation: u8,
    prior: &Entry,
    old: &SigningKey,
    new: &SigningKey,
) -> (Entry, SignedKv) {
    let entry = entry_for(new, &[key_tag, generation], prior.object_hash().unwrap().to_vec());
    let update = update_for(key_tag, &entry, &[old, new]);
    (entry, update)
}

/// An update that fails mutator validation (signed by a key the entry does
/// not authorize).
pub(crate) fn invalid_write(key_tag: u8) -> SignedKv {
    let owner = test_key(200);
    let stranger = test_key(201);
    let entry = entry_for(&owner, &[key_tag, 99], vec![]);
    update_for(key_tag, &entry, &[&stranger])
}
