//! Per-instance operation counters

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lock-free counters tracking what an instance has done since startup.
pub struct InstanceMetrics {
    started_at: DateTime<Utc>,
    operations_submitted: AtomicU64,
    operations_distributed: AtomicU64,
    operations_received: AtomicU64,
    operations_persisted_from_peers: AtomicU64,
    undos: AtomicU64,
    redos: AtomicU64,
    sync_failures: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of the counters, serializable for reporting.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
    pub operations_submitted: u64,
    pub operations_distributed: u64,
    pub operations_received: u64,
    pub operations_persisted_from_peers: u64,
    pub undos: u64,
    pub redos: u64,
    pub sync_failures: u64,
    pub persist_failures: u64,
}

impl InstanceMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            operations_submitted: AtomicU64::new(0),
            operations_distributed: AtomicU64::new(0),
            operations_received: AtomicU64::new(0),
            operations_persisted_from_peers: AtomicU64::new(0),
            undos: AtomicU64::new(0),
            redos: AtomicU64::new(0),
            sync_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn record_submitted(&self) {
        self.operations_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed(&self) {
        self.operations_distributed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch of peer operations arrived from the network.
    pub fn record_received(&self, count: u64) {
        self.operations_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_persisted_from_peers(&self, count: u64) {
        self.operations_persisted_from_peers
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_undo(&self) {
        self.undos.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redo(&self) {
        self.redos.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_failure(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, instance_id: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            instance_id: instance_id.to_string(),
            started_at: self.started_at,
            operations_submitted: self.operations_submitted.load(Ordering::Relaxed),
            operations_distributed: self.operations_distributed.load(Ordering::Relaxed),
            operations_received: self.operations_received.load(Ordering::Relaxed),
            operations_persisted_from_peers: self
                .operations_persisted_from_peers
                .load(Ordering::Relaxed),
            undos: self.undos.load(Ordering::Relaxed),
            redos: self.redos.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for InstanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = InstanceMetrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_received(3);
        metrics.record_undo();

        let snap = metrics.snapshot("inst-a");
        assert_eq!(snap.instance_id, "inst-a");
        assert_eq!(snap.operations_submitted, 2);
        assert_eq!(snap.operations_received, 3);
        assert_eq!(snap.undos, 1);
        assert_eq!(snap.redos, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = InstanceMetrics::new();
        let json = serde_json::to_string(&metrics.snapshot("inst-a")).unwrap();
        assert!(json.contains("\"operations_submitted\":0"));
    }
}
