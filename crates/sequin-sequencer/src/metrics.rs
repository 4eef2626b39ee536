//! Prometheus metrics for the sequencer.
//!
//! Metric names are part of the operational contract — dashboards and
//! alerts key on them — and must not change:
//!
//! | Metric | Type |
//! |--------|------|
//! | `kt_signer_mutations` | Counter |
//! | `kt_signer_mutations_unique` | Counter |
//! | `kt_signer_map_update_seconds` | Histogram |
//! | `kt_signer_create_epoch_seconds` | Histogram |

use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

/// Latency bucket boundaries in seconds (the `+Inf` bucket is implicit).
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Sequencer metrics, registered against a caller-supplied registry.
#[derive(Clone)]
pub struct SequencerMetrics {
    mutations: IntCounter,
    mutations_unique: IntCounter,
    map_update_seconds: Histogram,
    create_epoch_seconds: Histogram,
}

impl SequencerMetrics {
    /// Create the metrics and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Fails if any metric is already registered (duplicate name).
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let mutations = IntCounter::with_opts(Opts::new(
            "kt_signer_mutations",
            "Number of mutations the sequencer has processed.",
        ))?;
        registry.register(Box::new(mutations.clone()))?;

        let mutations_unique = IntCounter::with_opts(Opts::new(
            "kt_signer_mutations_unique",
            "Number of mutations the sequencer has processed post per-epoch dedup.",
        ))?;
        registry.register(Box::new(mutations_unique.clone()))?;

        let map_update_seconds = Histogram::with_opts(
            HistogramOpts::new("kt_signer_map_update_seconds", "Seconds waiting for map update")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(map_update_seconds.clone()))?;

        let create_epoch_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "kt_signer_create_epoch_seconds",
                "Seconds spent generating epoch",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(create_epoch_seconds.clone()))?;

        Ok(Self {
            mutations,
            mutations_unique,
            map_update_seconds,
            create_epoch_seconds,
        })
    }

    /// Create metrics backed by a private registry (tests, embedded use).
    pub fn unregistered() -> Self {
        Self::register(&Registry::new()).expect("fresh registry cannot have duplicates")
    }

    /// Record a processed batch: total mutations and post-dedup index count.
    pub fn record_batch(&self, mutations: usize, unique_indexes: usize) {
        self.mutations.inc_by(mutations as u64);
        self.mutations_unique.inc_by(unique_indexes as u64);
    }

    /// Record time spent in `set_leaves`.
    pub fn observe_map_update(&self, elapsed: Duration) {
        self.map_update_seconds.observe(elapsed.as_secs_f64());
    }

    /// Record total time spent building an epoch.
    pub fn observe_create_epoch(&self, elapsed: Duration) {
        self.create_epoch_seconds.observe(elapsed.as_secs_f64());
    }

    /// Total mutations processed (test hook).
    pub fn mutations_total(&self) -> u64 {
        self.mutations.get()
    }

    /// Total post-dedup indexes processed (test hook).
    pub fn mutations_unique_total(&self) -> u64 {
        self.mutations_unique.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_exposes_fixed_names() {
        let registry = Registry::new();
        let _metrics = SequencerMetrics::register(&registry).unwrap();

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.contains(&"kt_signer_mutations".to_string()));
        assert!(names.contains(&"kt_signer_mutations_unique".to_string()));
        assert!(names.contains(&"kt_signer_map_update_seconds".to_string()));
        assert!(names.contains(&"kt_signer_create_epoch_seconds".to_string()));
    }

    #[test]
    fn test_double_register_fails() {
        let registry = Registry::new();
        let _first = SequencerMetrics::register(&registry).unwrap();
        assert!(SequencerMetrics::register(&registry).is_err());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = SequencerMetrics::unregistered();
        metrics.record_batch(5, 3);
        metrics.record_batch(2, 2);
        assert_eq!(metrics.mutations_total(), 7);
        assert_eq!(metrics.mutations_unique_total(), 5);
    }

    #[test]
    fn test_histogram_observations() {
        let registry = Registry::new();
        let metrics = SequencerMetrics::register(&registry).unwrap();
        metrics.observe_map_update(Duration::from_millis(30));
        metrics.observe_create_epoch(Duration::from_millis(120));

        let families = registry.gather();
        let epoch_family = families
            .iter()
            .find(|f| f.get_name() == "kt_signer_create_epoch_seconds")
            .unwrap();
        let histogram = epoch_family.get_metric()[0].get_histogram();
        assert_eq!(histogram.get_sample_count(), 1);
        // 11 explicit boundaries plus the implicit +Inf.
        assert_eq!(histogram.get_bucket().len(), LATENCY_BUCKETS.len());
    }
}
