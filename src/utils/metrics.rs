//! Observability and Metrics
//!
//! Counters for packet traffic and session outcomes.
//!
//! Uses atomic counters so one collector can be shared by any number of
//! sessions through an `Arc<Metrics>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for OBEX sessions
#[derive(Debug)]
pub struct Metrics {
    /// Total packets written
    pub packets_sent: AtomicU64,
    /// Total packets read
    pub packets_received: AtomicU64,
    /// Total bytes written
    pub bytes_sent: AtomicU64,
    /// Total bytes read
    pub bytes_received: AtomicU64,
    /// Connect requests answered with Success
    pub connects_accepted: AtomicU64,
    /// Connect requests answered with ServiceUnavailable
    pub connects_rejected: AtomicU64,
    /// Requests that ended in a failure response code
    pub requests_failed: AtomicU64,
    /// Inbound objects handed to a sink
    pub objects_completed: AtomicU64,
    /// Inbound objects dropped by Abort, Disconnect or authorization
    pub objects_aborted: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connects_accepted: AtomicU64::new(0),
            connects_rejected: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            objects_completed: AtomicU64::new(0),
            objects_aborted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a packet written
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a packet read
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn connect_accepted(&self) {
        self.connects_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_rejected(&self) {
        self.connects_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_completed(&self) {
        self.objects_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_aborted(&self) {
        self.objects_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connects_accepted: self.connects_accepted.load(Ordering::Relaxed),
            connects_rejected: self.connects_rejected.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            objects_completed: self.objects_completed.load(Ordering::Relaxed),
            objects_aborted: self.objects_aborted.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            connects_accepted = snapshot.connects_accepted,
            connects_rejected = snapshot.connects_rejected,
            requests_failed = snapshot.requests_failed,
            objects_completed = snapshot.objects_completed,
            objects_aborted = snapshot.objects_aborted,
            uptime_seconds = snapshot.uptime_seconds,
            "OBEX metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connects_accepted: u64,
    pub connects_rejected: u64,
    pub requests_failed: u64,
    pub objects_completed: u64,
    pub objects_aborted: u64,
    pub uptime_seconds: u64,
}
