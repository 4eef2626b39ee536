//! The epoch builder and driver loop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sequin_queue::MutationSource;
use sequin_trees::{LATEST_REVISION, LogClient, MapClient};
use sequin_types::{
    EpochSummary, LogLeaf, MapIndex, MapLeaf, MapLeafInclusion, MapRootMetadata, Mutator,
    SequencedMutation, SignedKv, SignedLogRoot, SignedMapRoot,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, timeout, timeout_at};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::SequencerError;
use crate::metrics::SequencerMetrics;
use crate::ticker::epoch_ticks;

/// Fresh deadline for the log anchor retry and the post-anchor proof
/// fetches. These run even when the epoch deadline has elapsed: once the
/// map has advanced, giving up on the anchor is a consistency incident,
/// not a latency win.
const ANCHOR_RETRY_DEADLINE: Duration = Duration::from_secs(5);

/// Timing parameters for the epoch loop.
#[derive(Debug, Clone, Copy)]
pub struct SequencerConfig {
    /// Tick interval, and the deadline for a single epoch build.
    pub min_interval: Duration,
    /// Maximum time between epochs; once breached, an epoch is forced even
    /// with no pending mutations.
    pub max_interval: Duration,
}

/// Builds epochs: drains mutations, advances the map, anchors the new root.
///
/// `create_epoch` is single-entry — it is only driven from [`run`](Self::run)
/// (or sequentially from tests). No two epoch builds are ever in flight.
pub struct Sequencer {
    config: SequencerConfig,
    map: Arc<dyn MapClient>,
    log: Arc<dyn LogClient>,
    mutator: Arc<dyn Mutator>,
    source: Arc<dyn MutationSource>,
    dispatcher: Dispatcher,
    metrics: Arc<SequencerMetrics>,
}

impl Sequencer {
    /// Create a sequencer over the given collaborators.
    pub fn new(
        config: SequencerConfig,
        map: Arc<dyn MapClient>,
        log: Arc<dyn LogClient>,
        mutator: Arc<dyn Mutator>,
        source: Arc<dyn MutationSource>,
        metrics: Arc<SequencerMetrics>,
    ) -> Self {
        Self {
            config,
            map,
            log,
            mutator,
            source,
            dispatcher: Dispatcher::new(),
            metrics,
        }
    }

    /// Register a subscriber for epoch summaries.
    pub async fn register(&self, subscriber: mpsc::Sender<EpochSummary>) {
        self.dispatcher.register(subscriber).await;
    }

    /// The dispatcher fanning out epoch summaries.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // -------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------

    /// Reconcile the log with the map at boot.
    ///
    /// The log must hold exactly one leaf per map revision, starting with
    /// the empty root: a fresh map already has revision 0, so an empty log
    /// is seeded with the empty root's anchor at index 0. When the log is
    /// one anchor short of the map head — the signature of a crash between
    /// the map write and the log anchor — the latest root is re-queued;
    /// identity-hash dedup makes this a no-op if the anchor actually exists.
    pub async fn initialize(&self) -> Result<(), SequencerError> {
        let log_root = self
            .log
            .get_latest_signed_log_root()
            .await
            .map_err(SequencerError::Log)?;
        let map_root = self
            .map
            .get_signed_map_root()
            .await
            .map_err(SequencerError::Map)?;

        if log_root.tree_size == 0 && map_root.map_revision == 0 {
            info!("initializing log with the empty map root");
            self.queue_anchor(&map_root).await?;
        } else if map_root.map_revision > 0 && log_root.tree_size == map_root.map_revision {
            warn!(
                revision = map_root.map_revision,
                tree_size = log_root.tree_size,
                "log is one anchor behind the map, re-queueing the latest root"
            );
            self.queue_anchor(&map_root).await?;
        }

        Ok(())
    }

    /// Serialize `smr` and queue it into the log.
    async fn queue_anchor(&self, smr: &SignedMapRoot) -> Result<(), SequencerError> {
        let leaf = LogLeaf::for_map_root(smr)?;
        self.log
            .queue_leaf(leaf)
            .await
            .map_err(SequencerError::Log)
    }

    // -------------------------------------------------------------------
    // Epoch building
    // -------------------------------------------------------------------

    /// Build one epoch.
    ///
    /// Returns `Ok(None)` when there is nothing to do (no pending mutations
    /// and `force` is false) — no revision is created and nothing is
    /// dispatched. Returns the epoch summary otherwise.
    pub async fn create_epoch(
        &self,
        force: bool,
    ) -> Result<Option<EpochSummary>, SequencerError> {
        let start = Instant::now();
        let deadline = start + self.config.min_interval;
        debug!(force, "starting sequencing run");

        // Current head: revision and mutation watermark.
        let root = bounded(deadline, "map root fetch", self.map.get_signed_map_root())
            .await?
            .map_err(SequencerError::Map)?;
        let start_seq = root.metadata.highest_fully_completed_seq;
        let revision = root.map_revision;
        debug!(revision, start_seq, "previous signed map root");

        // Transactional read of everything past the watermark.
        let (max_seq, batch) = self.read_mutations(deadline, start_seq as u64).await?;
        // An empty read reports the watermark itself; never let it regress.
        let max_seq = (max_seq as i64).max(start_seq);

        if batch.is_empty() && !force {
            debug!("no mutations found, skipping epoch");
            return Ok(None);
        }

        // Distinct indexes in first-occurrence order. The order binds each
        // mutation's dispatch proof deterministically.
        let mut indexes: Vec<MapIndex> = Vec::with_capacity(batch.len());
        let mut seen: HashSet<MapIndex> = HashSet::with_capacity(batch.len());
        for update in &batch {
            let index = MapIndex::from_slice(&update.key_value.key);
            if seen.insert(index) {
                indexes.push(index);
            }
        }

        // Current leaves with inclusion proofs under the prior root. The
        // proofs are retained for the epoch summary. The leaf values are
        // trusted as-is; a deployment with an untrusted map server would
        // verify inclusion here.
        let current = bounded(
            deadline,
            "leaf fetch",
            self.map.get_leaves(&indexes, LATEST_REVISION),
        )
        .await?
        .map_err(SequencerError::Map)?;
        let proofs: HashMap<MapIndex, MapLeafInclusion> = current
            .iter()
            .map(|inclusion| (inclusion.leaf.index, inclusion.clone()))
            .collect();

        // Fold the batch into a new leaf set.
        let new_leaves = apply_mutations(self.mutator.as_ref(), &batch, &current);
        debug!(
            mutations = batch.len(),
            leaves = new_leaves.len(),
            "applied mutations"
        );

        // Write the new revision. Attempted at most once per epoch: a
        // second set_leaves would mint a second revision.
        let map_update_start = Instant::now();
        let new_smr = bounded(
            deadline,
            "set_leaves",
            self.map.set_leaves(
                new_leaves,
                MapRootMetadata {
                    highest_fully_completed_seq: max_seq,
                },
            ),
        )
        .await?
        .map_err(SequencerError::Map)?;
        self.metrics.observe_map_update(map_update_start.elapsed());
        self.metrics.record_batch(batch.len(), indexes.len());
        let new_revision = new_smr.map_revision;
        debug!(revision = new_revision, watermark = max_seq, "map advanced");

        // Anchor the new root into the log. From here on the map has
        // already advanced, so failures are no longer transient epoch
        // aborts; see anchor_with_retry.
        self.anchor_with_retry(deadline, &new_smr).await?;

        // Fetch log proofs for the summary. The internal summary pins the
        // consistency-proof first size to zero (no proof); observers
        // recompute consistency against their own trusted log size.
        let (log_root, log_consistency, log_inclusion) =
            self.log_proofs(0, new_revision - 1).await?;

        info!(
            revision = new_revision,
            root = %hex(&new_smr.root_hash),
            "created epoch"
        );
        self.metrics.observe_create_epoch(start.elapsed());

        Ok(Some(EpochSummary {
            epoch: new_revision,
            smr: new_smr,
            log_root,
            log_consistency,
            log_inclusion,
            mutations: batch
                .into_iter()
                .map(|update| {
                    let index = MapIndex::from_slice(&update.key_value.key);
                    // Every batch index was requested; a server answering
                    // with fewer leaves yields an empty proof, not a crash.
                    let proof = proofs.get(&index).cloned().unwrap_or_else(|| {
                        MapLeafInclusion {
                            leaf: MapLeaf {
                                index,
                                leaf_value: Vec::new(),
                            },
                            inclusion: Vec::new(),
                        }
                    });
                    SequencedMutation { update, proof }
                })
                .collect(),
        }))
    }

    /// Read all mutations past `start_seq` in one transaction.
    ///
    /// The commit is required even for a read-only transaction; if it
    /// fails, the mutations are unclaimed and the epoch aborts.
    async fn read_mutations(
        &self,
        deadline: Instant,
        start_seq: u64,
    ) -> Result<(u64, Vec<SignedKv>), SequencerError> {
        let mut txn = bounded(deadline, "queue begin", self.source.begin()).await??;

        match bounded(deadline, "queue read", txn.read_all(start_seq)).await? {
            Ok((max_seq, batch)) => {
                bounded(deadline, "queue commit", txn.commit()).await??;
                Ok((max_seq, batch))
            }
            Err(read_err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(%rollback_err, "cannot roll back the mutation read");
                }
                Err(read_err.into())
            }
        }
    }

    /// Queue the anchor for `smr`, retrying once on a fresh short deadline.
    ///
    /// A deadline lapse between the map write and this anchor must not
    /// abandon the anchor: the attempt still runs, bounded by
    /// [`ANCHOR_RETRY_DEADLINE`]. Re-submission is safe under the log's
    /// identity-hash dedup, which is also what makes the eventual
    /// partial-commit recovery at boot possible.
    async fn anchor_with_retry(
        &self,
        deadline: Instant,
        smr: &SignedMapRoot,
    ) -> Result<(), SequencerError> {
        let leaf = LogLeaf::for_map_root(smr)?;
        let effective = deadline.max(Instant::now() + ANCHOR_RETRY_DEADLINE);

        let first = timeout_at(effective, self.log.queue_leaf(leaf.clone())).await;
        let first_err = match first {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => sequin_trees::TreeError::Unavailable("anchor deadline exceeded".to_string()),
        };
        warn!(
            revision = smr.map_revision,
            error = %first_err,
            "log anchor failed, retrying once"
        );

        match timeout(ANCHOR_RETRY_DEADLINE, self.log.queue_leaf(leaf)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SequencerError::PartialCommit {
                revision: smr.map_revision,
                source: e,
            }),
            Err(_) => Err(SequencerError::PartialCommit {
                revision: smr.map_revision,
                source: sequin_trees::TreeError::Unavailable(
                    "anchor retry deadline exceeded".to_string(),
                ),
            }),
        }
    }

    /// Fetch the log root, an inclusion proof for `leaf_index`, and (when
    /// `first_tree_size` is non-zero) a consistency proof.
    ///
    /// Runs after the anchor, so it gets its own deadline rather than the
    /// possibly exhausted epoch deadline.
    async fn log_proofs(
        &self,
        first_tree_size: i64,
        leaf_index: i64,
    ) -> Result<(SignedLogRoot, Vec<[u8; 32]>, Vec<[u8; 32]>), SequencerError> {
        let deadline = Instant::now() + ANCHOR_RETRY_DEADLINE;

        let log_root = bounded(
            deadline,
            "log root fetch",
            self.log.get_latest_signed_log_root(),
        )
        .await?
        .map_err(SequencerError::Log)?;
        let second_tree_size = log_root.tree_size;

        let consistency = if first_tree_size != 0 {
            bounded(
                deadline,
                "consistency proof",
                self.log
                    .get_consistency_proof(first_tree_size, second_tree_size),
            )
            .await?
            .map_err(SequencerError::Log)?
        } else {
            Vec::new()
        };

        let inclusion = bounded(
            deadline,
            "inclusion proof",
            self.log.get_inclusion_proof(leaf_index, second_tree_size),
        )
        .await?
        .map_err(SequencerError::Log)?;

        Ok((log_root, consistency, inclusion))
    }

    // -------------------------------------------------------------------
    // Driver loop
    // -------------------------------------------------------------------

    /// Run the epoch loop until `shutdown` fires.
    ///
    /// Initialization errors are logged, not propagated — the first epoch
    /// build re-surfaces anything persistent. Every tick runs one epoch
    /// build; errors are logged and the loop continues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.initialize().await {
            error!(error = %e, "initialize failed");
        }

        // Resume epoch timing from the map head's timestamp. If the head
        // cannot be read, force a bootstrap epoch to establish one.
        let last = match timeout(self.config.min_interval, self.map.get_signed_map_root()).await {
            Ok(Ok(root)) => instant_for_timestamp(root.timestamp_nanos),
            _ => {
                info!("map head unavailable, forcing a bootstrap epoch");
                match self.create_epoch(true).await {
                    Ok(Some(summary)) => self.dispatcher.dispatch(&summary).await,
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "bootstrap epoch failed"),
                }
                match timeout(self.config.min_interval, self.map.get_signed_map_root()).await {
                    Ok(Ok(root)) => instant_for_timestamp(root.timestamp_nanos),
                    _ => Instant::now(),
                }
            }
        };

        let mut ticks = epoch_ticks(last, self.config.min_interval, self.config.max_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("sequencer loop stopping");
                    return;
                }
                tick = ticks.recv() => {
                    let Some(force) = tick else { return };
                    match self.create_epoch(force).await {
                        Ok(Some(summary)) => self.dispatcher.dispatch(&summary).await,
                        Ok(None) => {}
                        Err(e @ SequencerError::PartialCommit { .. }) => {
                            error!(
                                error = %e,
                                "map revision without log anchor — operator attention required; \
                                 the next boot re-queues the missing anchor"
                            );
                        }
                        Err(e) => error!(error = %e, "epoch failed"),
                    }
                }
            }
        }
    }
}

// -----------------------------------------------------------------------
// Pure helpers
// -----------------------------------------------------------------------

/// Fold `batch` over the fetched leaves into the set of leaves to write.
///
/// Mutations apply in sequence order; each one sees the output of earlier
/// mutations on the same index, and the last valid mutation per index wins.
/// A failing mutation is logged and skipped — one poison update must not
/// block the epoch. Output order is sorted by index, which keeps the
/// `set_leaves` call reproducible for diagnostics.
pub(crate) fn apply_mutations(
    mutator: &dyn Mutator,
    batch: &[SignedKv],
    current: &[MapLeafInclusion],
) -> Vec<MapLeaf> {
    let fetched: HashMap<MapIndex, &[u8]> = current
        .iter()
        .map(|inclusion| (inclusion.leaf.index, inclusion.leaf.leaf_value.as_slice()))
        .collect();

    let mut updated: BTreeMap<MapIndex, Vec<u8>> = BTreeMap::new();

    for update in batch {
        let index = MapIndex::from_slice(&update.key_value.key);

        let prior_bytes: &[u8] = updated
            .get(&index)
            .map(Vec::as_slice)
            .or_else(|| fetched.get(&index).copied())
            .unwrap_or_default();

        let prior = match sequin_types::Entry::from_leaf_value(prior_bytes) {
            Ok(prior) => prior,
            Err(e) => {
                warn!(%index, error = %e, "undecodable current leaf, skipping mutation");
                continue;
            }
        };

        let next = match mutator.mutate(prior.as_ref(), update) {
            Ok(next) => next,
            Err(e) => {
                warn!(%index, error = %e, "mutation rejected");
                continue;
            }
        };

        match next.to_leaf_value() {
            Ok(value) => {
                updated.insert(index, value);
            }
            Err(e) => {
                warn!(%index, error = %e, "cannot serialize new entry, skipping mutation");
            }
        }
    }

    updated
        .into_iter()
        .map(|(index, leaf_value)| MapLeaf { index, leaf_value })
        .collect()
}

/// Run `future` against an absolute deadline, mapping a lapse to a
/// [`SequencerError::Deadline`] tagged with the operation name.
async fn bounded<T>(
    deadline: Instant,
    operation: &'static str,
    future: impl Future<Output = T>,
) -> Result<T, SequencerError> {
    timeout_at(deadline, future)
        .await
        .map_err(|_| SequencerError::Deadline(operation))
}

/// Map a wall-clock timestamp onto the monotonic clock, saturating at "now".
fn instant_for_timestamp(timestamp_nanos: i64) -> Instant {
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    let elapsed = now_nanos.saturating_sub(timestamp_nanos).max(0) as u64;
    Instant::now()
        .checked_sub(Duration::from_nanos(elapsed))
        .unwrap_or_else(Instant::now)
}

/// Encode bytes as a hex string.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
