//! Lock-free counters for the ingest loop and retry worker.
//!
//! Plain atomics, written from the hot paths and read via [`snapshot`]
//! (`PipelineMetrics::snapshot`) for logging and tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the ingest loop and the retry worker.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// CDC events applied to the cache or handed to the worker.
    events: AtomicU64,
    /// Events discarded as malformed or lacking an after-image.
    discarded: AtomicU64,
    /// Fact events skipped because they were snapshot replay.
    snapshots_skipped: AtomicU64,
    /// Enrichment attempts, including retries.
    enrich_attempts: AtomicU64,
    /// Measurements acknowledged by the output channel.
    published: AtomicU64,
    /// Values dropped after exhausting enrichment retries.
    dropped: AtomicU64,
    /// Enriched measurements lost at the publish step (no channel, or
    /// delivery failure).
    publish_drops: AtomicU64,
}

impl PipelineMetrics {
    /// Records a successfully dispatched CDC event.
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a discarded event.
    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a snapshot-replay fact event that was skipped.
    pub fn record_snapshot_skipped(&self) {
        self.snapshots_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one enrichment attempt.
    pub fn record_enrich_attempt(&self) {
        self.enrich_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an acknowledged publish.
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a value dropped after retry exhaustion.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an enriched measurement lost at the publish step.
    pub fn record_publish_drop(&self) {
        self.publish_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent-enough point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            snapshots_skipped: self.snapshots_skipped.load(Ordering::Relaxed),
            enrich_attempts: self.enrich_attempts.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            publish_drops: self.publish_drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// CDC events applied.
    pub events: u64,
    /// Events discarded.
    pub discarded: u64,
    /// Snapshot fact events skipped.
    pub snapshots_skipped: u64,
    /// Enrichment attempts, including retries.
    pub enrich_attempts: u64,
    /// Acknowledged publishes.
    pub published: u64,
    /// Values dropped after retry exhaustion.
    pub dropped: u64,
    /// Measurements lost at the publish step.
    pub publish_drops: u64,
}
