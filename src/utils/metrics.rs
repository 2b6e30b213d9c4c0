//! Observability and Metrics
//!
//! Atomic counters for one server instance. The server context owns the
//! collector; there is no process-wide instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently live connections
    pub connections_active: AtomicU64,
    /// Connections refused because the live set was full
    pub connections_rejected: AtomicU64,
    /// Successful logins
    pub logins: AtomicU64,
    /// Total packets sent
    pub packets_sent: AtomicU64,
    /// Total packets received
    pub packets_received: AtomicU64,
    /// Total frame bytes sent
    pub bytes_sent: AtomicU64,
    /// Total frame bytes received
    pub bytes_received: AtomicU64,
    /// Inbound packets dropped by the registry
    pub unknown_packets: AtomicU64,
    /// Outbound packets dropped for having no id in the client's version
    pub unmapped_packets: AtomicU64,
    /// Outbound packets deflated
    pub packets_compressed: AtomicU64,
    /// Connections dropped for an unanswered keep-alive
    pub keepalive_timeouts: AtomicU64,
    /// Connections dropped for a protocol error
    pub protocol_errors: AtomicU64,
    /// Legacy server-list pings answered
    pub legacy_pings: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            logins: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            unknown_packets: AtomicU64::new(0),
            unmapped_packets: AtomicU64::new(0),
            packets_compressed: AtomicU64::new(0),
            keepalive_timeouts: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            legacy_pings: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet handed to the transport
    pub fn packet_sent(&self, byte_count: u64, compressed: bool) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
        if compressed {
            self.packets_compressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn unknown_packet(&self) {
        self.unknown_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unmapped_packet(&self) {
        self.unmapped_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_timeout(&self) {
        self.keepalive_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn legacy_ping(&self) {
        self.legacy_pings.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            unknown_packets: self.unknown_packets.load(Ordering::Relaxed),
            unmapped_packets: self.unmapped_packets.load(Ordering::Relaxed),
            packets_compressed: self.packets_compressed.load(Ordering::Relaxed),
            keepalive_timeouts: self.keepalive_timeouts.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            legacy_pings: self.legacy_pings.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connections_rejected = snapshot.connections_rejected,
            logins = snapshot.logins,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            unknown_packets = snapshot.unknown_packets,
            unmapped_packets = snapshot.unmapped_packets,
            packets_compressed = snapshot.packets_compressed,
            keepalive_timeouts = snapshot.keepalive_timeouts,
            protocol_errors = snapshot.protocol_errors,
            legacy_pings = snapshot.legacy_pings,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
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
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub logins: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub unknown_packets: u64,
    pub unmapped_packets: u64,
    pub packets_compressed: u64,
    pub keepalive_timeouts: u64,
    pub protocol_errors: u64,
    pub legacy_pings: u64,
    pub uptime_seconds: u64,
}

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
