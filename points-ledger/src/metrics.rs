//! Metrics collection for observability
//!
//! Prometheus metrics for the ledger service, kept on a private registry so
//! several ledgers can live in one process.
//!
//! # Metrics
//!
//! - `points_mutations_total{operation}` - Committed credits, debits and sets
//! - `points_mutation_failures_total{operation}` - Mutations that returned an error
//! - `points_conflict_retries_total` - Write conflicts that were retried
//! - `points_mutation_duration_seconds` - Histogram of mutation latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed mutations by operation
    pub mutations_total: IntCounterVec,

    /// Failed mutations by operation
    pub mutation_failures: IntCounterVec,

    /// Conflict retries
    pub conflict_retries: IntCounter,

    /// Mutation duration histogram
    pub mutation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("conflict_retries", &self.conflict_retries.get())
            .field("mutations_observed", &self.mutation_duration.get_sample_count())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let mutations_total = IntCounterVec::new(
            Opts::new("points_mutations_total", "Committed ledger mutations"),
            &["operation"],
        )?;
        registry.register(Box::new(mutations_total.clone()))?;

        let mutation_failures = IntCounterVec::new(
            Opts::new(
                "points_mutation_failures_total",
                "Ledger mutations that returned an error",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(mutation_failures.clone()))?;

        let conflict_retries = IntCounter::new(
            "points_conflict_retries_total",
            "Write conflicts that were retried",
        )?;
        registry.register(Box::new(conflict_retries.clone()))?;

        let mutation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "points_mutation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(mutation_duration.clone()))?;

        Ok(Self {
            mutations_total,
            mutation_failures,
            conflict_retries,
            mutation_duration,
            registry,
        })
    }

    /// Record a committed mutation
    pub fn record_mutation(&self, operation: &str, duration_seconds: f64) {
        self.mutations_total.with_label_values(&[operation]).inc();
        self.mutation_duration.observe(duration_seconds);
    }

    /// Record a failed mutation
    pub fn record_failure(&self, operation: &str) {
        self.mutation_failures.with_label_values(&[operation]).inc();
    }

    /// Record a conflict retry
    pub fn record_conflict_retry(&self) {
        self.conflict_retries.inc();
    }

    /// Committed mutations for one operation
    pub fn mutations(&self, operation: &str) -> u64 {
        self.mutations_total.with_label_values(&[operation]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
