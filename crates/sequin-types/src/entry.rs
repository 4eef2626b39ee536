//! Directory entry types and the signed mutation envelope.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CodecError;

/// A public key authorized to mutate a directory entry.
///
/// Exactly one variant per key. Only Ed25519 keys are verified in-process;
/// the other variants are carried for front-ends that resolve them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKey {
    /// Ed25519 public key (32 bytes).
    Ed25519([u8; 32]),
    /// RSA-SHA256 key with a 3072-bit modulus, DER-encoded.
    RsaSha256_3072(Vec<u8>),
    /// ECDSA key on P-256, DER-encoded.
    EcdsaP256(Vec<u8>),
}

impl PublicKey {
    /// Verify `signed` over `digest` with this key.
    ///
    /// Returns `false` when the key bytes are invalid, the scheme does not
    /// match the key variant, or the signature does not check out. Non-Ed25519
    /// schemes are never accepted here.
    pub fn verify(&self, digest: &[u8], signed: &DigitallySigned) -> bool {
        match (self, signed.scheme) {
            (PublicKey::Ed25519(key_bytes), SignatureScheme::Ed25519) => {
                let Ok(verifying_key) = VerifyingKey::from_bytes(key_bytes) else {
                    return false;
                };
                let Ok(signature) = Signature::from_slice(&signed.signature) else {
                    return false;
                };
                verifying_key.verify(digest, &signature).is_ok()
            }
            _ => false,
        }
    }
}

/// Signature scheme tag carried alongside raw signature bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    /// Ed25519.
    Ed25519,
    /// RSA-SHA256 with a 3072-bit modulus.
    RsaSha256_3072,
    /// ECDSA on P-256.
    EcdsaP256,
}

/// A raw signature with its scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitallySigned {
    /// Signature scheme of `signature`.
    pub scheme: SignatureScheme,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
}

/// A directory entry — the value stored at one map index.
///
/// `previous` is the object hash of the entry this one replaces, forming a
/// per-index hash chain. It is empty for the first entry at an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Commitment to the user profile (opaque to the sequencer).
    pub commitment: Vec<u8>,
    /// Keys authorized to sign the next mutation of this entry.
    pub authorized_keys: Vec<PublicKey>,
    /// Object hash of the previous entry at this index (empty if none).
    pub previous: Vec<u8>,
}

impl Entry {
    /// SHA-256 object hash of this entry's postcard encoding.
    ///
    /// The next entry in the chain carries this value in `previous`.
    pub fn object_hash(&self) -> Result<[u8; 32], CodecError> {
        let bytes = postcard::to_allocvec(self)?;
        Ok(Sha256::digest(&bytes).into())
    }

    /// Serialize into a map leaf value.
    pub fn to_leaf_value(&self) -> Result<Vec<u8>, CodecError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode an entry from a map leaf value.
    ///
    /// An empty leaf value means the index has never been written and maps
    /// to `None`.
    pub fn from_leaf_value(value: &[u8]) -> Result<Option<Entry>, CodecError> {
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(postcard::from_bytes(value)?))
    }
}

/// A key-value pair: a 32-byte map index and a serialized [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// VRF-derived map index bytes (zero-padded to 32 when applied).
    pub key: Vec<u8>,
    /// Postcard-serialized next [`Entry`].
    pub value: Vec<u8>,
}

impl KeyValue {
    /// SHA-256 digest over the postcard encoding — the bytes that
    /// [`SignedKv`] signatures cover.
    pub fn signing_digest(&self) -> Result<[u8; 32], CodecError> {
        let bytes = postcard::to_allocvec(self)?;
        Ok(Sha256::digest(&bytes).into())
    }
}

/// A signed mutation request for one map index.
///
/// Must carry at least one signature by a key in the *previous* entry's
/// authorized set (proof of ownership transfer) and one by a key in the
/// *new* entry's set (proof of accepting the new identity). The
/// [`Mutator`](crate::Mutator) enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKv {
    /// The mutation payload.
    pub key_value: KeyValue,
    /// Signatures over [`KeyValue::signing_digest`], keyed by key id.
    pub signatures: BTreeMap<String, DigitallySigned>,
}

impl SignedKv {
    /// Create an unsigned mutation envelope.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key_value: KeyValue { key, value },
            signatures: BTreeMap::new(),
        }
    }

    /// Attach an Ed25519 signature over the key-value digest.
    pub fn attach_ed25519(
        &mut self,
        key_id: impl Into<String>,
        signing_key: &SigningKey,
    ) -> Result<(), CodecError> {
        let digest = self.key_value.signing_digest()?;
        let signature = signing_key.sign(&digest);
        self.signatures.insert(
            key_id.into(),
            DigitallySigned {
                scheme: SignatureScheme::Ed25519,
                signature: signature.to_bytes().to_vec(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_entry_leaf_value_roundtrip() {
        let entry = Entry {
            commitment: b"commitment".to_vec(),
            authorized_keys: vec![PublicKey::Ed25519(test_key(1).verifying_key().to_bytes())],
            previous: vec![],
        };
        let value = entry.to_leaf_value().unwrap();
        let decoded = Entry::from_leaf_value(&value).unwrap();
        assert_eq!(decoded, Some(entry));
    }

    #[test]
    fn test_empty_leaf_value_is_none() {
        assert_eq!(Entry::from_leaf_value(&[]).unwrap(), None);
    }

    #[test]
    fn test_object_hash_deterministic() {
        let entry = Entry {
            commitment: b"c".to_vec(),
            authorized_keys: vec![],
            previous: vec![],
        };
        assert_eq!(entry.object_hash().unwrap(), entry.object_hash().unwrap());
    }

    #[test]
    fn test_object_hash_changes_with_content() {
        let a = Entry {
            commitment: b"a".to_vec(),
            authorized_keys: vec![],
            previous: vec![],
        };
        let b = Entry {
            commitment: b"b".to_vec(),
            authorized_keys: vec![],
            previous: vec![],
        };
        assert_ne!(a.object_hash().unwrap(), b.object_hash().unwrap());
    }

    #[test]
    fn test_ed25519_signature_verifies() {
        let signing_key = test_key(2);
        let public = PublicKey::Ed25519(signing_key.verifying_key().to_bytes());

        let mut update = SignedKv::new(vec![1; 32], b"value".to_vec());
        update.attach_ed25519("key-1", &signing_key).unwrap();

        let digest = update.key_value.signing_digest().unwrap();
        let signed = update.signatures.get("key-1").unwrap();
        assert!(public.verify(&digest, signed));
    }

    #[test]
    fn test_wrong_key_rejects_signature() {
        let signing_key = test_key(3);
        let other = PublicKey::Ed25519(test_key(4).verifying_key().to_bytes());

        let mut update = SignedKv::new(vec![1; 32], b"value".to_vec());
        update.attach_ed25519("key-1", &signing_key).unwrap();

        let digest = update.key_value.signing_digest().unwrap();
        let signed = update.signatures.get("key-1").unwrap();
        assert!(!other.verify(&digest, signed));
    }

    #[test]
    fn test_non_ed25519_scheme_never_verifies() {
        let key = PublicKey::RsaSha256_3072(vec![1, 2, 3]);
        let signed = DigitallySigned {
            scheme: SignatureScheme::RsaSha256_3072,
            signature: vec![0; 384],
        };
        assert!(!key.verify(b"digest", &signed));
    }

    #[test]
    fn test_signed_kv_roundtrip_postcard() {
        let mut update = SignedKv::new(vec![5; 32], b"payload".to_vec());
        update.attach_ed25519("owner", &test_key(5)).unwrap();

        let encoded = postcard::to_allocvec(&update).unwrap();
        let decoded: SignedKv = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(update, decoded);
    }
}
