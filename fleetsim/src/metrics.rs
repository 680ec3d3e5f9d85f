use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const ANOMALIES: &str = "simulator.anomalies";
pub const DATA_SENT: &str = "simulator.data.sent";
pub const DISCONNECTED: &str = "simulator.disconnected";
pub const RECONNECTED: &str = "simulator.reconnected";

/// Sink for the four monotonic simulator counters.
pub trait MetricsSink: Send + Sync {
    fn record_anomaly(&self);
    fn record_sent(&self);
    fn record_disconnect(&self);
    fn record_reconnect(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub anomalies: u64,
    pub data_sent: u64,
    pub disconnected: u64,
    pub reconnected: u64,
}

impl MetricsSnapshot {
    /// Counter names paired with their values.
    pub fn named(&self) -> [(&'static str, u64); 4] {
        [
            (ANOMALIES, self.anomalies),
            (DATA_SENT, self.data_sent),
            (DISCONNECTED, self.disconnected),
            (RECONNECTED, self.reconnected),
        ]
    }
}

/// In-process counters.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    anomalies: AtomicU64,
    data_sent: AtomicU64,
    disconnected: AtomicU64,
    reconnected: AtomicU64,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            anomalies: self.anomalies.load(Ordering::Relaxed),
            data_sent: self.data_sent.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            reconnected: self.reconnected.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for FleetMetrics {
    fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sent(&self) {
        self.data_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_disconnect(&self) {
        self.disconnected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reconnect(&self) {
        self.reconnected.fetch_add(1, Ordering::Relaxed);
    }
}
