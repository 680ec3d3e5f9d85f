/**
 * FLEET CONTROLLER - Surface de contrôle publique de la simulation
 *
 * RÔLE : Bootstrap (validation → readiness → création → registration → stream),
 * start/stop de la simulation, actions manuelles sur un device.
 *
 * CONCURRENCE : les opérations manuelles tournent en parallèle des ticks du
 * scheduler ; elles ne touchent qu'aux flags atomiques des devices.
 */

use crate::config::SimulatorConfig;
use crate::downstream::{HttpRequestChannel, RequestChannel};
use crate::error::{SimError, SimResult};
use crate::metrics::MetricsSink;
use crate::models::{DeviceView, Reading};
use crate::readiness::ReadinessProber;
use crate::registration::{RegistrationClient, RegistrationSummary};
use crate::rng::{RandomSource, SeededRandom};
use crate::scheduler::{PeriodicTask, Scheduler};
use crate::state::{Fleet, SharedFleet};
use crate::streaming::{MqttSession, StreamPolicy, StreamSession, StreamingChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External collaborators, injectable for tests.
pub struct Collaborators {
    pub requests: Arc<dyn RequestChannel>,
    /// `None` disables the streaming channel.
    pub stream: Option<Arc<dyn StreamSession>>,
    pub rng: Arc<dyn RandomSource>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
    /// HTTP request channel, MQTT session when `websocketUrl` is set, seeded RNG.
    pub fn from_config(config: &SimulatorConfig, metrics: Arc<dyn MetricsSink>) -> SimResult<Self> {
        let requests = HttpRequestChannel::new(&config.target_url, config.request_timeout())?;
        let stream = match config.websocket_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                let client_id = format!("fleetsim-{}", Uuid::new_v4());
                Some(Arc::new(MqttSession::from_url(url, &client_id)?) as Arc<dyn StreamSession>)
            }
            None => None,
        };
        let rng = SeededRandom::new(config.seed);
        if let Some(seed) = rng.seed() {
            info!("[bootstrap] RNG seeded with {seed}");
        }
        Ok(Self {
            requests: Arc::new(requests),
            stream,
            rng: Arc::new(rng),
            metrics,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub devices: usize,
    pub registration: RegistrationSummary,
    pub stream_connected: bool,
}

pub struct FleetController {
    config: SimulatorConfig,
    fleet: SharedFleet,
    requests: Arc<dyn RequestChannel>,
    stream: Option<Arc<StreamingChannel>>,
    rng: Arc<dyn RandomSource>,
    metrics: Arc<dyn MetricsSink>,
    enabled: Arc<AtomicBool>,
    bootstrapped: AtomicBool,
    scheduler: Arc<Scheduler>,
    task: PeriodicTask,
}

impl FleetController {
    pub fn new(config: SimulatorConfig, deps: Collaborators) -> Self {
        let fleet: SharedFleet = Arc::new(Fleet::new());
        let enabled = Arc::new(AtomicBool::new(true));
        let policy = StreamPolicy {
            send_reconnect_attempts: config.streaming.send_reconnect_attempts,
            base_delay: Duration::from_millis(config.streaming.base_delay_ms),
            connect_timeout: Duration::from_millis(config.streaming.connect_timeout_ms),
            reconnect_cooldown: config.push_interval(),
        };
        let stream = deps
            .stream
            .map(|session| Arc::new(StreamingChannel::new(session, policy)));

        let scheduler = Arc::new(Scheduler::new(
            fleet.clone(),
            deps.requests.clone(),
            stream.clone(),
            deps.rng.clone(),
            deps.metrics.clone(),
            config.probabilities,
            enabled.clone(),
        ));
        let task = PeriodicTask::new(config.push_interval());

        Self {
            config,
            fleet,
            requests: deps.requests,
            stream,
            rng: deps.rng,
            metrics: deps.metrics,
            enabled,
            bootstrapped: AtomicBool::new(false),
            scheduler,
            task,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn fleet(&self) -> &SharedFleet {
        &self.fleet
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn streaming_channel(&self) -> Option<&Arc<StreamingChannel>> {
        self.stream.as_ref()
    }

    /// Validates, waits for the analyser, creates the fleet and registers
    /// every device. `IllegalState` errors must abort the process. A failed
    /// bootstrap leaves the fleet empty and may be retried.
    pub async fn bootstrap(&self) -> SimResult<BootstrapReport> {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return Err(SimError::IllegalState("fleet already bootstrapped".into()));
        }
        let outcome = self.run_bootstrap().await;
        if outcome.is_err() {
            self.bootstrapped.store(false, Ordering::SeqCst);
        }
        outcome
    }

    async fn run_bootstrap(&self) -> SimResult<BootstrapReport> {
        self.config.validate()?;
        let health_url = self.config.health_url()?;
        let registration_url = self.config.registration_url()?;

        let prober = ReadinessProber::new(self.requests.clone());
        let readiness = &self.config.readiness;
        let ready = prober
            .probe(&health_url, readiness.max_attempts, Duration::from_millis(readiness.delay_ms))
            .await;
        if !ready {
            return Err(SimError::IllegalState(format!(
                "Analyser health endpoint not reachable at {health_url}"
            )));
        }

        // Plus aucune erreur possible à partir d'ici : la flotte n'est créée qu'une fois.
        self.fleet.populate(self.config.device_count, self.config.sensor_kinds());
        info!(
            "[bootstrap] generated {} devices with sensors {:?}",
            self.fleet.len(),
            self.config.sensor_types
        );

        let registration = RegistrationClient::new(self.requests.clone()).with_policy(
            self.config.registration.max_attempts,
            Duration::from_millis(self.config.registration.retry_delay_ms),
        );
        let summary = registration.register_all(&self.fleet, &registration_url).await;
        info!(
            "[bootstrap] registration done: {} registered, {} on local id",
            summary.registered,
            summary.degraded.len()
        );

        let stream_connected = match &self.stream {
            Some(stream) => {
                let streaming = &self.config.streaming;
                let ok = stream
                    .connect_with_retry(
                        streaming.connect_attempts,
                        Duration::from_millis(streaming.base_delay_ms),
                    )
                    .await;
                if !ok {
                    warn!("[bootstrap] streaming channel unavailable, sends will retry inline");
                }
                ok
            }
            None => {
                debug!("[bootstrap] no websocketUrl, streaming channel disabled");
                false
            }
        };

        Ok(BootstrapReport {
            devices: self.fleet.len(),
            registration: summary,
            stream_connected,
        })
    }

    /// Starts the periodic tick loop.
    pub fn start_scheduler(&self) {
        let scheduler = self.scheduler.clone();
        self.task.start(move || {
            let scheduler = scheduler.clone();
            async move {
                scheduler.tick().await;
            }
        });
        info!("[scheduler] running every {:?}", self.task.period());
    }

    /// Stops the tick loop and releases the streaming session.
    pub async fn shutdown(&self) {
        self.task.stop();
        if let Some(stream) = &self.stream {
            stream.disconnect().await;
        }
        info!("[control] simulator stopped");
    }

    pub fn start_simulation(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        info!("[control] simulation enabled");
    }

    pub fn stop_simulation(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        info!("[control] simulation paused");
    }

    pub fn is_simulation_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns false when no device has this id.
    pub fn disconnect_device(&self, id: u64) -> bool {
        self.set_connected(id, false)
    }

    /// Returns false when no device has this id.
    pub fn reconnect_device(&self, id: u64) -> bool {
        self.set_connected(id, true)
    }

    fn set_connected(&self, id: u64, connected: bool) -> bool {
        let Some(device) = self.fleet.get(id) else {
            return false;
        };
        if device.set_connected(connected) != connected {
            info!("[control] device {id} connected={connected}");
        }
        true
    }

    /// Sends one anomalous reading per sensor kind of a connected device, on
    /// the request channel only. Unknown or disconnected devices are ignored.
    /// Returns how many readings were accepted.
    pub async fn inject_anomaly_to_device(&self, id: u64) -> usize {
        let Some(device) = self.fleet.get(id).filter(|d| d.is_connected()) else {
            return 0;
        };

        let mut sent = 0;
        for kind in device.sensor_kinds() {
            let value = kind.anomalous_value(self.rng.as_ref());
            let reading = Reading::online(device.target_id(), kind.clone(), value);
            match self.requests.send_reading(&reading).await {
                Ok(()) => {
                    warn!(
                        "[control] [MANUAL ANOMALY] local {} target {} {kind} => {value}",
                        device.id(),
                        reading.target_id
                    );
                    self.metrics.record_anomaly();
                    sent += 1;
                }
                Err(e) => error!(
                    "[control] failed to send manual anomaly for device {}: {e}",
                    device.id()
                ),
            }
        }
        sent
    }

    pub fn devices(&self) -> Vec<DeviceView> {
        self.fleet.views()
    }

    pub fn device(&self, id: u64) -> Option<DeviceView> {
        self.fleet.get(id).map(|d| d.view())
    }
}

impl Drop for FleetController {
    fn drop(&mut self) {
        self.task.stop();
    }
}
