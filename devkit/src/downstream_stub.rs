/*!
Canal requête simulé

`RequestChannel` en mémoire : analyser toujours prêt, ids assignés à partir
de 101, lectures enregistrées. Les lectures peuvent être refusées pour tester
les chemins d'échec sans serveur HTTP.
*/

use async_trait::async_trait;
use fleetsim::downstream::RequestChannel;
use fleetsim::error::{SimError, SimResult};
use fleetsim::models::{Reading, RegistrationRequest};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub struct RecordingChannel {
    next_id: AtomicU64,
    reject_readings: AtomicBool,
    registrations: Mutex<Vec<RegistrationRequest>>,
    readings: Mutex<Vec<Reading>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(crate::fake_analyser::FIRST_ASSIGNED_ID),
            reject_readings: AtomicBool::new(false),
            registrations: Mutex::new(Vec::new()),
            readings: Mutex::new(Vec::new()),
        })
    }

    pub fn reject_readings(&self, reject: bool) {
        self.reject_readings.store(reject, Ordering::SeqCst);
    }

    pub fn registrations(&self) -> Vec<RegistrationRequest> {
        self.registrations.lock().clone()
    }

    /// Readings received, accepted or not.
    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }
}

#[async_trait]
impl RequestChannel for RecordingChannel {
    async fn check_health(&self, _url: &str) -> SimResult<()> {
        Ok(())
    }

    async fn register_device(&self, _url: &str, request: &RegistrationRequest) -> SimResult<u64> {
        self.registrations.lock().push(request.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_reading(&self, reading: &Reading) -> SimResult<()> {
        self.readings.lock().push(reading.clone());
        if self.reject_readings.load(Ordering::SeqCst) {
            return Err(SimError::UnexpectedStatus { status: 500, url: "[MOCK]".into() });
        }
        Ok(())
    }
}
