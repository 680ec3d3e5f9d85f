//! Doubles for the unit tests of this crate. The devkit crate carries the
//! richer versions used by the integration scenarios.

use crate::downstream::RequestChannel;
use crate::error::{SimError, SimResult};
use crate::models::{Reading, RegistrationRequest};
use crate::rng::RandomSource;
use crate::streaming::StreamSession;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Always returns the same sample.
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_f64(&self) -> f64 {
        self.0
    }
}

/// Request channel with scripted health/registration answers.
/// Unscripted health checks and registrations fail; readings succeed unless
/// `fail_readings(true)`.
#[derive(Default)]
pub struct StubChannel {
    health: Mutex<VecDeque<bool>>,
    health_calls: AtomicUsize,
    registrations: Mutex<VecDeque<Option<u64>>>,
    registration_log: Mutex<Vec<RegistrationRequest>>,
    readings: Mutex<Vec<Reading>>,
    fail_readings: AtomicBool,
}

impl StubChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_health(&self, answers: impl IntoIterator<Item = bool>) {
        self.health.lock().extend(answers);
    }

    pub fn script_registrations(&self, answers: impl IntoIterator<Item = Option<u64>>) {
        self.registrations.lock().extend(answers);
    }

    pub fn fail_readings(&self, fail: bool) {
        self.fail_readings.store(fail, Ordering::SeqCst);
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        self.registration_log.lock().clone()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }
}

#[async_trait]
impl RequestChannel for StubChannel {
    async fn check_health(&self, url: &str) -> SimResult<()> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        match self.health.lock().pop_front() {
            Some(true) => Ok(()),
            _ => Err(SimError::UnexpectedStatus { status: 503, url: url.to_string() }),
        }
    }

    async fn register_device(&self, url: &str, request: &RegistrationRequest) -> SimResult<u64> {
        self.registration_log.lock().push(request.clone());
        match self.registrations.lock().pop_front() {
            Some(Some(id)) => Ok(id),
            _ => Err(SimError::UnexpectedStatus { status: 500, url: url.to_string() }),
        }
    }

    async fn send_reading(&self, reading: &Reading) -> SimResult<()> {
        self.readings.lock().push(reading.clone());
        if self.fail_readings.load(Ordering::SeqCst) {
            Err(SimError::UnexpectedStatus { status: 500, url: "stub".into() })
        } else {
            Ok(())
        }
    }
}

/// Stream session that refuses the first `failures` handshakes.
pub struct FlakySession {
    failures_left: AtomicUsize,
    hang: bool,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FlakySession {
    fn build(failures: usize, hang: bool) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            hang,
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_first(failures: usize) -> Arc<Self> {
        Self::build(failures, false)
    }

    pub fn never_connects() -> Arc<Self> {
        Self::build(usize::MAX, false)
    }

    pub fn hanging() -> Arc<Self> {
        Self::build(0, true)
    }

    pub fn drop_transport(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl StreamSession for FlakySession {
    async fn connect(&self) -> SimResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != usize::MAX {
                self.failures_left.store(left - 1, Ordering::SeqCst);
            }
            return Err(SimError::Stream("handshake refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, destination: &str, payload: Vec<u8>) -> SimResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SimError::Stream("not connected".into()));
        }
        self.published.lock().push((destination.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
