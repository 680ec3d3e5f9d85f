/*!
Test Harness pour le simulateur

Câble un `FleetController` réel sur :
- le faux analyser HTTP (canal requête réel via reqwest)
- une session streaming simulée (optionnelle)
- une source aléatoire au choix (seedée par défaut)
Les délais sont raccourcis pour que les scénarios tournent en quelques ms.
*/

use crate::fake_analyser::FakeAnalyser;
use crate::session_stub::MockStreamSession;
use anyhow::Result;
use fleetsim::downstream::HttpRequestChannel;
use fleetsim::rng::{RandomSource, SeededRandom};
use fleetsim::{
    BootstrapReport, Collaborators, FleetController, FleetMetrics, SimResult, SimulatorConfig,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SEED: u64 = 42;

pub struct HarnessBuilder {
    analyser: FakeAnalyser,
    config: SimulatorConfig,
    session: Option<MockStreamSession>,
    rng: Arc<dyn RandomSource>,
}

impl HarnessBuilder {
    pub fn devices(mut self, count: usize) -> Self {
        self.config.device_count = count;
        self
    }

    pub fn sensors(mut self, kinds: &[&str]) -> Self {
        self.config.sensor_types = kinds.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn configure(mut self, edit: impl FnOnce(&mut SimulatorConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn with_session(mut self, session: MockStreamSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_random(mut self, rng: impl RandomSource + 'static) -> Self {
        self.rng = Arc::new(rng);
        self
    }

    pub fn build(self) -> Result<TestHarness> {
        let metrics = FleetMetrics::shared();
        let requests =
            HttpRequestChannel::new(&self.config.target_url, self.config.request_timeout())?;
        let deps = Collaborators {
            requests: Arc::new(requests),
            stream: self.session.clone().map(MockStreamSession::into_shared),
            rng: self.rng,
            metrics: metrics.clone(),
        };
        let controller = Arc::new(FleetController::new(self.config, deps));

        Ok(TestHarness {
            analyser: self.analyser,
            session: self.session,
            metrics,
            controller,
        })
    }
}

/// Harness de test complet autour d'un `FleetController`
pub struct TestHarness {
    pub analyser: FakeAnalyser,
    pub session: Option<MockStreamSession>,
    pub metrics: Arc<FleetMetrics>,
    pub controller: Arc<FleetController>,
}

impl TestHarness {
    /// Démarre le faux analyser et prépare une config rapide : 2 devices
    /// TEMPERATURE, tick de 50 ms, pas de streaming.
    pub async fn builder() -> Result<HarnessBuilder> {
        init_tracing();
        let analyser = FakeAnalyser::start().await?;

        let mut config = SimulatorConfig {
            device_count: 2,
            sensor_types: vec!["TEMPERATURE".into()],
            target_url: analyser.target_url(),
            data_push_interval_ms: 50,
            request_timeout_ms: 2000,
            ..SimulatorConfig::default()
        };
        config.readiness.delay_ms = 10;
        config.registration.retry_delay_ms = 10;
        config.streaming.base_delay_ms = 5;
        config.streaming.connect_timeout_ms = 500;

        Ok(HarnessBuilder {
            analyser,
            config,
            session: None,
            rng: Arc::new(SeededRandom::from_seed(TEST_SEED)),
        })
    }

    pub async fn bootstrap(&self) -> SimResult<BootstrapReport> {
        self.controller.bootstrap().await
    }

    /// Attend que l'analyser ait reçu au moins `count` lectures.
    pub async fn wait_for_readings(&self, count: usize, timeout_ms: u64) -> Result<Vec<Value>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let readings = self.analyser.readings();
            if readings.len() >= count {
                return Ok(readings);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("expected {count} readings, got {}", readings.len());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}
