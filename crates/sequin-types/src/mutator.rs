//! The mutation validation seam.
//!
//! [`Mutator`] is the pure function through which the epoch builder applies
//! each signed update to the (optional) prior entry. [`EntryMutator`] is the
//! reference implementation: it enforces the per-index hash chain and the
//! two-sided signature requirement of [`SignedKv`].

use crate::entry::{Entry, SignedKv};
use crate::error::CodecError;

/// Errors from validating a single mutation. A failing mutation is skipped;
/// it never aborts the batch it arrived in.
#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    /// The update payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The update carries an empty entry value.
    #[error("update carries an empty entry value")]
    EmptyValue,

    /// The new entry authorizes no keys, which would brick the index.
    #[error("new entry has no authorized keys")]
    NoAuthorizedKeys,

    /// `previous` does not match the object hash of the prior entry.
    #[error("hash chain mismatch: previous does not commit to the prior entry")]
    HashChainMismatch,

    /// No signature by a key the prior entry authorized.
    #[error("missing signature by a previously authorized key")]
    NoPriorOwnerSignature,

    /// No signature by a key the new entry authorizes.
    #[error("missing signature by a newly authorized key")]
    NoNewOwnerSignature,
}

/// Applies one signed update to an optional prior entry, producing the next
/// entry or a validation error. Pure: no I/O, no retained state.
pub trait Mutator: Send + Sync {
    /// Validate `update` against `prior` and return the next entry.
    fn mutate(&self, prior: Option<&Entry>, update: &SignedKv) -> Result<Entry, MutatorError>;
}

/// Reference mutator for directory entries.
///
/// Checks, in order:
/// 1. the update's value decodes to an [`Entry`] with at least one
///    authorized key;
/// 2. `previous` equals the prior entry's object hash (or is empty when
///    there is no prior entry);
/// 3. some signature verifies under a key in the prior entry's authorized
///    set (skipped for first writes);
/// 4. some signature verifies under a key in the new entry's authorized set.
///
/// Only Ed25519 keys verify; deployments carrying RSA or ECDSA keys resolve
/// those at the front-end before submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryMutator;

impl EntryMutator {
    /// Create a new reference mutator.
    pub fn new() -> Self {
        Self
    }
}

impl Mutator for EntryMutator {
    fn mutate(&self, prior: Option<&Entry>, update: &SignedKv) -> Result<Entry, MutatorError> {
        let next =
            Entry::from_leaf_value(&update.key_value.value)?.ok_or(MutatorError::EmptyValue)?;

        if next.authorized_keys.is_empty() {
            return Err(MutatorError::NoAuthorizedKeys);
        }

        let digest = update.key_value.signing_digest()?;

        match prior {
            Some(prior) => {
                let prior_hash = prior.object_hash()?;
                if next.previous != prior_hash {
                    return Err(MutatorError::HashChainMismatch);
                }

                let prior_ok = prior.authorized_keys.iter().any(|key| {
                    update
                        .signatures
                        .values()
                        .any(|signed| key.verify(&digest, signed))
                });
                if !prior_ok {
                    return Err(MutatorError::NoPriorOwnerSignature);
                }
            }
            None => {
                if !next.previous.is_empty() {
                    return Err(MutatorError::HashChainMismatch);
                }
            }
        }

        let new_ok = next.authorized_keys.iter().any(|key| {
            update
                .signatures
                .values()
                .any(|signed| key.verify(&digest, signed))
        });
        if !new_ok {
            return Err(MutatorError::NoNewOwnerSignature);
        }

        Ok(next)
    }
}
