//! Periodic driver of the simulation.
//!
//! Each tick walks the fleet in order: flips connectivity at random, builds one
//! reading per device and dispatches it on the request channel and the
//! streaming channel. The two channels are separate failure domains: each
//! runs its own loop over the tick's readings, concurrently with the other.

use crate::config::Probabilities;
use crate::downstream::RequestChannel;
use crate::metrics::MetricsSink;
use crate::models::{Device, Reading};
use crate::rng::RandomSource;
use crate::state::SharedFleet;
use crate::streaming::StreamingChannel;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one tick did. Counts are per reading, not per device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub paused: bool,
    pub readings: usize,
    pub sent: usize,
    pub failed: usize,
    pub streamed: usize,
    pub anomalies: usize,
    pub disconnects: usize,
    pub reconnects: usize,
}

pub struct Scheduler {
    fleet: SharedFleet,
    requests: Arc<dyn RequestChannel>,
    stream: Option<Arc<StreamingChannel>>,
    rng: Arc<dyn RandomSource>,
    metrics: Arc<dyn MetricsSink>,
    probabilities: Probabilities,
    enabled: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        fleet: SharedFleet,
        requests: Arc<dyn RequestChannel>,
        stream: Option<Arc<StreamingChannel>>,
        rng: Arc<dyn RandomSource>,
        metrics: Arc<dyn MetricsSink>,
        probabilities: Probabilities,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self { fleet, requests, stream, rng, metrics, probabilities, enabled }
    }

    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        if !self.enabled.load(Ordering::Relaxed) {
            debug!("[scheduler] simulation paused");
            report.paused = true;
            return report;
        }

        let mut batch = Vec::new();
        for device in self.fleet.snapshot() {
            self.advance_connectivity(&device, &mut report);
            if let Some(reading) = self.next_reading(&device, &mut report) {
                batch.push((device.id(), reading));
            }
        }
        report.readings = batch.len();

        // Deux boucles indépendantes : un stream en panne ne retarde pas les requêtes.
        let ((sent, failed), streamed) =
            tokio::join!(self.deliver_requests(&batch), self.stream_batch(&batch));
        report.sent = sent;
        report.failed = failed;
        report.streamed = streamed;
        report
    }

    /// Request channel, in collection order. Returns (sent, failed).
    async fn deliver_requests(&self, batch: &[(u64, Reading)]) -> (usize, usize) {
        let (mut sent, mut failed) = (0, 0);
        for (local_id, reading) in batch {
            match self.requests.send_reading(reading).await {
                Ok(()) => {
                    self.metrics.record_sent();
                    sent += 1;
                    debug!(
                        "[scheduler] sent reading for local {local_id} target {}",
                        reading.target_id
                    );
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        "[scheduler] failed to send data for local device {local_id} \
                         target {}: {e}",
                        reading.target_id
                    );
                }
            }
        }
        (sent, failed)
    }

    async fn stream_batch(&self, batch: &[(u64, Reading)]) -> usize {
        let Some(stream) = &self.stream else {
            return 0;
        };
        let mut streamed = 0;
        for (_, reading) in batch {
            if stream.send(reading).await {
                streamed += 1;
            }
        }
        streamed
    }

    /// Disconnected devices may come back; connected ones may drop. Never both
    /// in the same tick.
    fn advance_connectivity(&self, device: &Device, report: &mut TickReport) {
        if !device.is_connected() {
            if self.rng.chance(self.probabilities.reconnect) {
                device.set_connected(true);
                self.metrics.record_reconnect();
                report.reconnects += 1;
                info!("[scheduler] [RECONNECTED] device {}", device.id());
            }
        } else if self.rng.chance(self.probabilities.disconnect) {
            device.set_connected(false);
            self.metrics.record_disconnect();
            report.disconnects += 1;
            info!("[scheduler] [DISCONNECTED] device {}", device.id());
        }
    }

    fn next_reading(&self, device: &Device, report: &mut TickReport) -> Option<Reading> {
        let kinds = device.sensor_kinds();
        if kinds.is_empty() {
            return None;
        }
        let kind = kinds[self.rng.next_index(kinds.len())].clone();
        let target_id = device.target_id();

        if !device.is_connected() {
            return Some(Reading::offline(target_id, kind));
        }

        if self.rng.chance(self.probabilities.anomaly) {
            let value = kind.anomalous_value(self.rng.as_ref());
            warn!(
                "[scheduler] [ANOMALY] local {} target {} - {kind}: {value}",
                device.id(),
                target_id
            );
            self.metrics.record_anomaly();
            report.anomalies += 1;
            Some(Reading::online(target_id, kind, value))
        } else {
            let value = kind.nominal_value(self.rng.as_ref());
            Some(Reading::online(target_id, kind, value))
        }
    }
}

/// Fixed-period background job with explicit start/stop.
///
/// A tick that runs longer than the period delays the next one; ticks never
/// overlap.
pub struct PeriodicTask {
    period: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(period: Duration) -> Self {
        Self { period, handle: Mutex::new(None) }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawns the job loop. No-op if already running. The first run is immediate.
    pub fn start<F, Fut>(&self, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let period = self.period;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        }));
    }

    /// Cancels the loop, including a tick in progress.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
