use crate::downstream::RequestChannel;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Polls the analyser health endpoint until it answers 2xx or attempts run out.
pub struct ReadinessProber {
    channel: Arc<dyn RequestChannel>,
}

impl ReadinessProber {
    pub fn new(channel: Arc<dyn RequestChannel>) -> Self {
        Self { channel }
    }

    /// Returns true on the first successful health check. The caller decides
    /// what a `false` means; bootstrap treats it as fatal.
    pub async fn probe(&self, health_url: &str, max_attempts: u32, delay: Duration) -> bool {
        for attempt in 1..=max_attempts {
            info!("[bootstrap] pinging analyser (attempt {attempt}/{max_attempts}): {health_url}");
            match self.channel.check_health(health_url).await {
                Ok(()) => {
                    info!("[bootstrap] analyser is up");
                    return true;
                }
                Err(e) => debug!("[bootstrap] analyser ping failed (attempt {attempt}): {e}"),
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }
        warn!("[bootstrap] analyser not reachable after {max_attempts} attempts: {health_url}");
        false
    }
}
