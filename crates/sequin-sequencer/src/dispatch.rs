//! Fan-out of epoch summaries to subscribers.

use sequin_types::EpochSummary;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

/// Delivers every completed epoch summary to all registered subscribers.
///
/// One mutex guards both the subscriber list and delivery, so registration
/// order is delivery order and every subscriber sees epochs in revision
/// order. Delivery is synchronous: a slow subscriber back-pressures the
/// sequencer loop, because dropping epochs is never acceptable for the
/// front-end fan-out processes downstream. Subscribers cannot be
/// unregistered; they live for the process lifetime.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<Vec<mpsc::Sender<EpochSummary>>>,
}

impl Dispatcher {
    /// Create a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber channel.
    pub async fn register(&self, subscriber: mpsc::Sender<EpochSummary>) {
        self.subscribers.lock().await.push(subscriber);
    }

    /// Deliver `summary` to every subscriber, in registration order.
    pub async fn dispatch(&self, summary: &EpochSummary) {
        let subscribers = self.subscribers.lock().await;
        for (position, subscriber) in subscribers.iter().enumerate() {
            if subscriber.send(summary.clone()).await.is_err() {
                // The receiver is gone. The slot stays (no unregister); the
                // epoch is lost for this subscriber only.
                warn!(
                    subscriber = position,
                    epoch = summary.epoch,
                    "subscriber channel closed, summary dropped"
                );
            }
        }
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use sequin_types::{SignedLogRoot, SignedMapRoot};

    use super::*;

    fn summary(epoch: i64) -> EpochSummary {
        EpochSummary {
            epoch,
            smr: SignedMapRoot::empty(1),
            log_root: SignedLogRoot {
                log_id: 2,
                tree_size: epoch,
                root_hash: vec![],
                timestamp_nanos: 0,
            },
            log_consistency: vec![],
            log_inclusion: vec![],
            mutations: vec![],
        }
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_all_epochs_in_order() {
        let dispatcher = Dispatcher::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        dispatcher.register(tx_a).await;
        dispatcher.register(tx_b).await;

        for epoch in 1..=3 {
            dispatcher.dispatch(&summary(epoch)).await;
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for expected in 1..=3 {
                assert_eq!(rx.recv().await.unwrap().epoch, expected);
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers_is_noop() {
        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(&summary(1)).await;
        assert_eq!(dispatcher.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_subscriber_does_not_block_others() {
        let dispatcher = Dispatcher::new();
        let (tx_dead, rx_dead) = mpsc::channel(1);
        let (tx_live, mut rx_live) = mpsc::channel(8);
        dispatcher.register(tx_dead).await;
        dispatcher.register(tx_live).await;
        drop(rx_dead);

        dispatcher.dispatch(&summary(7)).await;
        assert_eq!(rx_live.recv().await.unwrap().epoch, 7);
    }

    #[tokio::test]
    async fn test_slow_subscriber_backpressures() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::channel(1);
        dispatcher.register(tx).await;

        dispatcher.dispatch(&summary(1)).await;

        // The channel is full; the second dispatch must wait until the
        // subscriber drains.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            dispatcher.dispatch(&summary(2)),
        )
        .await;
        assert!(second.is_err(), "dispatch should block on a full channel");

        assert_eq!(rx.recv().await.unwrap().epoch, 1);
        dispatcher.dispatch(&summary(2)).await;
        assert_eq!(rx.recv().await.unwrap().epoch, 2);
    }
}
