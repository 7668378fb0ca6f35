//! Fanout counters
//!
//! Counters are kept locally so a server can report its own numbers, and are
//! mirrored into the `metrics` facade for whatever recorder the process
//! installs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector for one fanout server
#[derive(Debug, Clone, Default)]
pub struct FanoutMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    events_received: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    subscribers_registered: AtomicU64,
    subscribers_deregistered: AtomicU64,
}

impl FanoutMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event taken off the producer channel
    pub fn record_event(&self) {
        self.inner.events_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fanout_events_total").increment(1);
    }

    /// Record the outcome of one broadcast
    pub fn record_delivery(&self, delivered: usize, dropped: usize) {
        self.inner
            .frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.inner
            .frames_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);

        metrics::counter!("fanout_frames_delivered_total").increment(delivered as u64);
        if dropped > 0 {
            metrics::counter!("fanout_frames_dropped_total").increment(dropped as u64);
        }
    }

    /// Record a new subscriber
    pub fn record_registered(&self) {
        self.inner
            .subscribers_registered
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fanout_subscribers_registered_total").increment(1);
        metrics::gauge!("fanout_subscribers").increment(1.0);
    }

    /// Record `count` subscribers leaving
    pub fn record_deregistered(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.inner
            .subscribers_deregistered
            .fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!("fanout_subscribers_deregistered_total").increment(count as u64);
        metrics::gauge!("fanout_subscribers").decrement(count as f64);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.inner.events_received.load(Ordering::Relaxed),
            frames_delivered: self.inner.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.inner.frames_dropped.load(Ordering::Relaxed),
            subscribers_registered: self.inner.subscribers_registered.load(Ordering::Relaxed),
            subscribers_deregistered: self
                .inner
                .subscribers_deregistered
                .load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub subscribers_registered: u64,
    pub subscribers_deregistered: u64,
}

impl MetricsSnapshot {
    /// Subscribers registered and not yet removed
    pub fn active_subscribers(&self) -> u64 {
        self.subscribers_registered
            .saturating_sub(self.subscribers_deregistered)
    }

    /// Fraction of frame deliveries lost to full queues
    pub fn drop_rate(&self) -> f64 {
        let attempts = self.frames_delivered + self.frames_dropped;
        if attempts == 0 {
            0.0
        } else {
            self.frames_dropped as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let metrics = FanoutMetrics::new();

        metrics.record_event();
        metrics.record_registered();
        metrics.record_registered();
        metrics.record_delivery(3, 1);
        metrics.record_deregistered(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_received, 1);
        assert_eq!(snapshot.frames_delivered, 3);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.active_subscribers(), 1);
        assert!((snapshot.drop_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_drop_rate_without_traffic() {
        assert_eq!(FanoutMetrics::new().snapshot().drop_rate(), 0.0);
    }
}
