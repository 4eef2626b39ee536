//! The epoch sequencer of the Sequin key transparency directory.
//!
//! Once per tick interval the sequencer drains pending signed mutations,
//! folds them into the verifiable map (one new revision per epoch), anchors
//! the resulting signed map root into the append-only log, and fans the
//! epoch summary out to registered subscribers.
//!
//! Epochs are strictly serialized — [`Sequencer::create_epoch`] is only ever
//! driven from the single loop in [`Sequencer::run`]. That serialization is
//! what keeps the mutation watermark stored inside the map root correct
//! across process restarts and failovers (never concurrent sequencers).

mod dispatch;
mod epoch;
mod error;
mod metrics;
mod ticker;

#[cfg(test)]
mod tests;

pub use dispatch::Dispatcher;
pub use epoch::{Sequencer, SequencerConfig};
pub use error::SequencerError;
pub use metrics::SequencerMetrics;
pub use ticker::epoch_ticks;
