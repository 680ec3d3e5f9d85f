use crate::downstream::RequestChannel;
use crate::models::{Device, RegistrationRequest};
use crate::state::Fleet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(400);

/// Outcome of registering the whole fleet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationSummary {
    pub registered: usize,
    /// Local ids of devices that kept their local id as delivery target.
    pub degraded: Vec<u64>,
}

/// Registers devices once at bootstrap with a bounded, fixed-delay retry.
pub struct RegistrationClient {
    channel: Arc<dyn RequestChannel>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl RegistrationClient {
    pub fn new(channel: Arc<dyn RequestChannel>) -> Self {
        Self {
            channel,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_policy(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = retry_delay;
        self
    }

    /// Registers one device. `None` once every attempt failed.
    pub async fn register(&self, device: &Device, registration_url: &str) -> Option<u64> {
        let request = RegistrationRequest::for_device(device);

        for attempt in 1..=self.max_attempts {
            info!(
                "[registration] {} -> {} as {} (try {attempt})",
                request.device_name, registration_url, request.device_type
            );
            match self.channel.register_device(registration_url, &request).await {
                Ok(assigned) => {
                    info!("[registration] device {} OK -> analyser id {assigned}", device.id());
                    return Some(assigned);
                }
                Err(e) => warn!(
                    "[registration] device {} attempt {attempt} failed: {e}",
                    device.id()
                ),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        None
    }

    /// Registers every device in order. A failure only degrades that device.
    pub async fn register_all(&self, fleet: &Fleet, registration_url: &str) -> RegistrationSummary {
        let mut summary = RegistrationSummary::default();
        for device in fleet.snapshot() {
            match self.register(&device, registration_url).await {
                Some(remote_id) => {
                    device.set_remote_id(remote_id);
                    summary.registered += 1;
                }
                None => {
                    warn!(
                        "[registration] proceeding without assigned id for local device {}",
                        device.id()
                    );
                    summary.degraded.push(device.id());
                }
            }
        }
        summary
    }
}
