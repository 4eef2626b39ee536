//! The epoch tick generator.
//!
//! Emits a boolean per tick interval: `true` means "create an epoch even if
//! no mutations are pending" (the max interval has elapsed since the last
//! forced epoch), `false` means "create one only if there is work". Short
//! intervals keep update latency low; the max bound keeps the transparency
//! log live even with zero traffic.

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};

/// Spawn the tick generator task and return its output channel.
///
/// `last` is when the previous epoch was created (derived from the map
/// head's timestamp at startup). The first element is emitted immediately,
/// without waiting for `min_interval`, iff the max interval would already
/// be breached — so a sequencer restarted after a long outage forces an
/// epoch right away.
///
/// The channel is bounded at one element: a slow epoch build back-pressures
/// the ticker instead of queueing stale ticks.
pub fn epoch_ticks(
    last: Instant,
    min_interval: Duration,
    max_interval: Duration,
) -> mpsc::Receiver<bool> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut last = last;

        // Resume directly from `last` rather than waiting a full interval.
        if Instant::now().duration_since(last) + min_interval >= max_interval {
            if tx.send(true).await.is_err() {
                return;
            }
            last = Instant::now();
        }

        let mut ticker = interval_at(Instant::now() + min_interval, min_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let now = ticker.tick().await;
            let force = now.duration_since(last) + min_interval >= max_interval;
            if force {
                last = now;
            }
            if tx.send(force).await.is_err() {
                return;
            }
        }
    });

    rx
}
