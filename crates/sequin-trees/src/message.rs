//! Wire protocol for the remote tree service.
//!
//! Requests and responses are postcard-serialized and sent length-prefixed
//! over a bidirectional QUIC stream, one request/response pair per stream.

use sequin_types::{
    LogLeaf, MapIndex, MapLeaf, MapLeafInclusion, MapRootMetadata, SignedLogRoot, SignedMapRoot,
};
use serde::{Deserialize, Serialize};

/// A request to the tree service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeRequest {
    /// Fetch the latest signed map root.
    MapRoot,

    /// Fetch leaves with inclusion proofs.
    MapLeaves {
        /// Indexes to fetch.
        indexes: Vec<MapIndex>,
        /// Revision, or -1 for latest.
        revision: i64,
    },

    /// Write a new map revision.
    MapSetLeaves {
        /// Leaves to write.
        leaves: Vec<MapLeaf>,
        /// Metadata persisted inside the new root.
        metadata: MapRootMetadata,
    },

    /// Fetch the latest signed log root.
    LogRoot,

    /// Queue a leaf into the log.
    LogQueueLeaf {
        /// The leaf to queue.
        leaf: LogLeaf,
    },

    /// Fetch a log consistency proof.
    LogConsistency {
        /// First tree size.
        first_tree_size: i64,
        /// Second tree size.
        second_tree_size: i64,
    },

    /// Fetch a log inclusion proof.
    LogInclusion {
        /// Index of the leaf to prove.
        leaf_index: i64,
        /// Tree size to prove under.
        tree_size: i64,
    },
}

/// A response from the tree service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeResponse {
    /// A signed map root.
    MapRoot(SignedMapRoot),
    /// Leaves with inclusion proofs, in request order.
    MapLeaves(Vec<MapLeafInclusion>),
    /// A signed log root.
    LogRoot(SignedLogRoot),
    /// Acknowledgement of a queued leaf.
    Ack,
    /// Proof hashes.
    Proof(Vec<[u8; 32]>),
    /// The service failed to handle the request.
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip_postcard() {
        let requests = vec![
            TreeRequest::MapRoot,
            TreeRequest::MapLeaves {
                indexes: vec![MapIndex::from([1u8; 32]), MapIndex::from([2u8; 32])],
                revision: -1,
            },
            TreeRequest::MapSetLeaves {
                leaves: vec![MapLeaf {
                    index: MapIndex::from([3u8; 32]),
                    leaf_value: b"entry".to_vec(),
                }],
                metadata: MapRootMetadata {
                    highest_fully_completed_seq: 42,
                },
            },
            TreeRequest::LogRoot,
            TreeRequest::LogQueueLeaf {
                leaf: LogLeaf {
                    leaf_value: b"anchor".to_vec(),
                    leaf_identity_hash: [7u8; 32],
                },
            },
            TreeRequest::LogConsistency {
                first_tree_size: 1,
                second_tree_size: 5,
            },
            TreeRequest::LogInclusion {
                leaf_index: 3,
                tree_size: 5,
            },
        ];

        for request in &requests {
            let encoded = postcard::to_allocvec(request).unwrap();
            let decoded: TreeRequest = postcard::from_bytes(&encoded).unwrap();
            assert_eq!(request, &decoded);
        }
    }

    #[test]
    fn test_response_roundtrip_postcard() {
        let responses = vec![
            TreeResponse::MapRoot(SignedMapRoot::empty(1)),
            TreeResponse::MapLeaves(vec![MapLeafInclusion {
                leaf: MapLeaf {
                    index: MapIndex::from([1u8; 32]),
                    leaf_value: vec![],
                },
                inclusion: vec![[9u8; 32]],
            }]),
            TreeResponse::LogRoot(SignedLogRoot {
                log_id: 2,
                tree_size: 10,
                root_hash: vec![1, 2, 3],
                timestamp_nanos: 99,
            }),
            TreeResponse::Ack,
            TreeResponse::Proof(vec![[4u8; 32], [5u8; 32]]),
            TreeResponse::Error("boom".to_string()),
        ];

        for response in &responses {
            let encoded = postcard::to_allocvec(response).unwrap();
            let decoded: TreeResponse = postcard::from_bytes(&encoded).unwrap();
            assert_eq!(response, &decoded);
        }
    }
}
