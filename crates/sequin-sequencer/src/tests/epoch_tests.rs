//! End-to-end epoch building scenarios against in-memory collaborators.

use sequin_trees::{LATEST_REVISION, MapClient};
use sequin_types::MapIndex;

use super::{first_write, harness, invalid_write, key_bytes, next_write, test_key};
use crate::error::SequencerError;

#[tokio::test]
async fn test_single_update_creates_epoch() {
    let h = harness();
    let owner = test_key(1);
    let (entry, update) = first_write(1, &owner);
    let seq = h.queue.push(update);

    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();

    // One new revision carrying the single leaf and the watermark.
    assert_eq!(summary.epoch, 1);
    assert_eq!(summary.smr.map_revision, 1);
    assert_eq!(
        summary.smr.metadata.highest_fully_completed_seq,
        seq as i64
    );
    assert_eq!(
        h.map.leaf(&MapIndex::from_slice(&key_bytes(1))),
        Some(entry.to_leaf_value().unwrap())
    );

    // One log leaf whose identity hash commits to the new root.
    assert_eq!(h.log.len(), 1);
    assert_eq!(
        h.log.leaf_at(0).unwrap().leaf_identity_hash,
        summary.smr.identity_hash().unwrap()
    );
    assert!(!summary.log_inclusion.is_empty());
    assert!(summary.log_consistency.is_empty());

    // The summary carries the mutation with its prior-revision proof.
    assert_eq!(summary.mutations.len(), 1);
    assert!(summary.mutations[0].proof.leaf.leaf_value.is_empty());
    assert!(!summary.mutations[0].proof.inclusion.is_empty());
}

#[tokio::test]
async fn test_same_index_twice_last_valid_wins() {
    let h = harness();
    let owner = test_key(1);
    let (first_entry, first) = first_write(2, &owner);
    let (second_entry, second) = next_write(2, 1, &first_entry, &owner, &owner);
    h.queue.push(first);
    h.queue.push(second);

    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();

    // One leaf written, carrying the later result; watermark covers both.
    assert_eq!(summary.epoch, 1);
    assert_eq!(summary.smr.metadata.highest_fully_completed_seq, 2);
    assert_eq!(
        h.map.leaf(&MapIndex::from_slice(&key_bytes(2))),
        Some(second_entry.to_leaf_value().unwrap())
    );

    // Both mutations appear in the summary, sharing the prior-rev proof.
    assert_eq!(summary.mutations.len(), 2);
    assert_eq!(
        summary.mutations[0].proof.inclusion,
        summary.mutations[1].proof.inclusion
    );

    assert_eq!(h.metrics.mutations_total(), 2);
    assert_eq!(h.metrics.mutations_unique_total(), 1);
}

#[tokio::test]
async fn test_invalid_mutation_skipped_batch_survives() {
    let h = harness();
    let owner = test_key(1);
    let (first_entry, first) = first_write(1, &owner);
    let (third_entry, third) = next_write(1, 1, &first_entry, &owner, &owner);
    h.queue.push(first);
    h.queue.push(invalid_write(3));
    h.queue.push(third);

    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();

    // Key A carries the final chained result, key B stays unwritten.
    assert_eq!(
        h.map.leaf(&MapIndex::from_slice(&key_bytes(1))),
        Some(third_entry.to_leaf_value().unwrap())
    );
    assert_eq!(h.map.leaf(&MapIndex::from_slice(&key_bytes(3))), None);

    // The watermark still covers the rejected mutation: it is consumed,
    // not retried forever.
    assert_eq!(summary.smr.metadata.highest_fully_completed_seq, 3);
    assert_eq!(summary.mutations.len(), 3);
}

#[tokio::test]
async fn test_forced_epoch_with_empty_queue() {
    let h = harness();

    let summary = h.sequencer.create_epoch(true).await.unwrap().unwrap();

    assert_eq!(summary.epoch, 1);
    assert!(summary.mutations.is_empty());
    assert_eq!(summary.smr.metadata.highest_fully_completed_seq, 0);
    assert_eq!(h.log.len(), 1);
}

#[tokio::test]
async fn test_unforced_empty_queue_skips_epoch() {
    let h = harness();

    let result = h.sequencer.create_epoch(false).await.unwrap();

    assert!(result.is_none());
    assert_eq!(h.map.set_leaves_calls(), 0);
    assert_eq!(h.log.queue_leaf_calls(), 0);
    assert_eq!(h.map.head_revision(), 0);
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn test_map_write_failure_aborts_epoch() {
    let h = harness();
    let owner = test_key(1);
    let (_, update) = first_write(1, &owner);
    h.queue.push(update);
    h.map.fail_next_set_leaves(1);

    let err = h.sequencer.create_epoch(false).await.unwrap_err();
    assert!(matches!(err, SequencerError::Map(_)));

    // Nothing advanced, nothing anchored.
    assert_eq!(h.map.head_revision(), 0);
    assert_eq!(h.log.queue_leaf_calls(), 0);

    // The mutations are still claimable at the next tick.
    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();
    assert_eq!(summary.epoch, 1);
    assert_eq!(summary.smr.metadata.highest_fully_completed_seq, 1);
}

#[tokio::test]
async fn test_anchor_failure_after_map_advance_is_partial_commit() {
    let h = harness();
    h.sequencer.initialize().await.unwrap();
    let owner = test_key(1);
    let (_, update) = first_write(1, &owner);
    h.queue.push(update);

    // Both the attempt and its retry fail.
    h.log.fail_next_queue_leaf(2);

    let err = h.sequencer.create_epoch(false).await.unwrap_err();
    match err {
        SequencerError::PartialCommit { revision, .. } => assert_eq!(revision, 1),
        other => panic!("expected partial commit, got {other:?}"),
    }

    // The map moved without a matching anchor.
    assert_eq!(h.map.head_revision(), 1);
    assert_eq!(h.log.len(), 1); // bootstrap leaf only
}

#[tokio::test]
async fn test_anchor_retries_once_on_transient_failure() {
    let h = harness();
    let owner = test_key(1);
    let (_, update) = first_write(1, &owner);
    h.queue.push(update);

    // First attempt fails, the retry lands.
    h.log.fail_next_queue_leaf(1);

    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();
    assert_eq!(summary.epoch, 1);
    assert_eq!(h.log.len(), 1);
}

#[tokio::test]
async fn test_queue_commit_failure_aborts_epoch() {
    let h = harness();
    let owner = test_key(1);
    let (_, update) = first_write(1, &owner);
    h.queue.push(update);
    h.queue.fail_next_commits(1);

    let err = h.sequencer.create_epoch(false).await.unwrap_err();
    assert!(matches!(err, SequencerError::Queue(_)));
    assert_eq!(h.map.set_leaves_calls(), 0);

    // Unclaimed mutations survive for the retry.
    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();
    assert_eq!(summary.smr.metadata.highest_fully_completed_seq, 1);
}

#[tokio::test]
async fn test_revisions_and_watermark_are_monotone() {
    let h = harness();
    let owner = test_key(1);

    let (entry1, update1) = first_write(1, &owner);
    h.queue.push(update1);
    let first = h.sequencer.create_epoch(false).await.unwrap().unwrap();

    // A forced empty epoch in between must not move the watermark.
    let second = h.sequencer.create_epoch(true).await.unwrap().unwrap();

    let (_, update2) = next_write(1, 1, &entry1, &owner, &owner);
    h.queue.push(update2);
    let third = h.sequencer.create_epoch(false).await.unwrap().unwrap();

    assert_eq!(
        (first.epoch, second.epoch, third.epoch),
        (1, 2, 3),
        "revisions advance by exactly one"
    );
    let watermarks = [
        first.smr.metadata.highest_fully_completed_seq,
        second.smr.metadata.highest_fully_completed_seq,
        third.smr.metadata.highest_fully_completed_seq,
    ];
    assert_eq!(watermarks, [1, 1, 2], "watermark never regresses");
}

#[tokio::test]
async fn test_every_epoch_is_anchored_at_its_index() {
    let h = harness();

    let first = h.sequencer.create_epoch(true).await.unwrap().unwrap();
    let second = h.sequencer.create_epoch(true).await.unwrap().unwrap();

    // Without a bootstrap leaf, revision r's anchor lands at index r − 1.
    assert_eq!(h.log.len(), 2);
    assert_eq!(
        h.log.leaf_at(0).unwrap().leaf_identity_hash,
        first.smr.identity_hash().unwrap()
    );
    assert_eq!(
        h.log.leaf_at(1).unwrap().leaf_identity_hash,
        second.smr.identity_hash().unwrap()
    );
}

#[tokio::test]
async fn test_requeueing_an_anchor_adds_no_leaf() {
    let h = harness();
    let summary = h.sequencer.create_epoch(true).await.unwrap().unwrap();
    assert_eq!(h.log.len(), 1);

    // Identity-hash dedup: the same root anchors at most once.
    use sequin_trees::LogClient;
    use sequin_types::LogLeaf;
    h.log
        .queue_leaf(LogLeaf::for_map_root(&summary.smr).unwrap())
        .await
        .unwrap();
    assert_eq!(h.log.len(), 1);
}

#[tokio::test]
async fn test_paged_backlog_drains_across_epochs() {
    let map = sequin_trees::MemoryMap::new(1);
    let log = sequin_trees::MemoryLog::new(2);
    let queue = sequin_queue::MemoryQueue::with_page_size(2);
    let sequencer = crate::Sequencer::new(
        crate::SequencerConfig {
            min_interval: tokio::time::Duration::from_secs(5),
            max_interval: tokio::time::Duration::from_secs(60),
        },
        std::sync::Arc::new(map.clone()),
        std::sync::Arc::new(log.clone()),
        std::sync::Arc::new(sequin_types::EntryMutator::new()),
        std::sync::Arc::new(queue.clone()),
        std::sync::Arc::new(crate::SequencerMetrics::unregistered()),
    );

    // Five first writes at distinct indexes, page size two.
    for tag in 1..=5 {
        let owner = test_key(tag);
        let (_, update) = first_write(tag, &owner);
        queue.push(update);
    }

    let mut watermarks = Vec::new();
    for _ in 0..3 {
        let summary = sequencer.create_epoch(false).await.unwrap().unwrap();
        watermarks.push(summary.smr.metadata.highest_fully_completed_seq);
    }

    assert_eq!(watermarks, [2, 4, 5]);
    assert!(sequencer.create_epoch(false).await.unwrap().is_none());
    assert_eq!(map.head_revision(), 3);
}

#[tokio::test]
async fn test_fetched_leaves_are_read_at_latest_revision() {
    let h = harness();
    let owner = test_key(1);
    let (entry1, update1) = first_write(1, &owner);
    h.queue.push(update1);
    h.sequencer.create_epoch(false).await.unwrap();

    // The second epoch's prior leaf for the index is revision 1's value.
    let (entry2, update2) = next_write(1, 1, &entry1, &owner, &owner);
    h.queue.push(update2);
    let summary = h.sequencer.create_epoch(false).await.unwrap().unwrap();

    assert_eq!(
        summary.mutations[0].proof.leaf.leaf_value,
        entry1.to_leaf_value().unwrap()
    );
    assert_eq!(
        h.map.leaf(&MapIndex::from_slice(&key_bytes(1))),
        Some(entry2.to_leaf_value().unwrap())
    );

    // And the map agrees when asked directly.
    let latest = h
        .map
        .get_leaves(&[MapIndex::from_slice(&key_bytes(1))], LATEST_REVISION)
        .await
        .unwrap();
    assert_eq!(latest[0].leaf.leaf_value, entry2.to_leaf_value().unwrap());
}
