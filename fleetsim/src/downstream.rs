//! Synchronous request channel towards the telemetry analyser.
//!
//! Three calls share one HTTP client: health probe, device registration and
//! reading delivery. Each call is one request; retry policy lives with the
//! callers.

use crate::error::{SimError, SimResult};
use crate::models::{Reading, RegistrationRequest, RegistrationResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// `GET {url}`; Ok on any 2xx.
    async fn check_health(&self, url: &str) -> SimResult<()>;

    /// `POST {url}` with the registration body; Ok with the assigned id on 201.
    async fn register_device(&self, url: &str, request: &RegistrationRequest) -> SimResult<u64>;

    /// `POST {targetUrl}` with the reading; Ok on any 2xx.
    async fn send_reading(&self, reading: &Reading) -> SimResult<()>;
}

#[derive(Clone)]
pub struct HttpRequestChannel {
    client: reqwest::Client,
    target_url: String,
}

impl HttpRequestChannel {
    pub fn new(target_url: &str, timeout: Duration) -> SimResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetsim/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            target_url: target_url.to_string(),
        })
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn check_health(&self, url: &str) -> SimResult<()> {
        let response = self.client.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SimError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            })
        }
    }

    async fn register_device(&self, url: &str, request: &RegistrationRequest) -> SimResult<u64> {
        let response = self.client.post(url).json(request).send().await?;
        if response.status() != StatusCode::CREATED {
            return Err(SimError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body: RegistrationResponse = response.json().await?;
        Ok(body.device_id)
    }

    async fn send_reading(&self, reading: &Reading) -> SimResult<()> {
        let response = self.client.post(&self.target_url).json(reading).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("[request] {} accepted reading for {}", status, reading.target_id);
            Ok(())
        } else {
            Err(SimError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.target_url.clone(),
            })
        }
    }
}
