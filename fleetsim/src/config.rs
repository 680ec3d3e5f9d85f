use crate::error::{SimError, SimResult};
use crate::models::SensorKind;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "simulator.yaml";
pub const HEALTH_PATH: &str = "actuator/health";
pub const DEVICE_PATH: &str = "device";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorConfig {
    pub device_count: usize,
    pub sensor_types: Vec<String>,
    pub target_url: String,
    pub websocket_url: Option<String>,
    /// Overrides the registration URL derived from `target_url`.
    pub device_registration_url: Option<String>,
    pub data_push_interval_ms: u64,
    pub control_addr: String,
    /// Fixed seed for reproducible runs; entropy when absent.
    pub seed: Option<u64>,
    pub request_timeout_ms: u64,
    pub probabilities: Probabilities,
    pub readiness: ReadinessConf,
    pub registration: RegistrationConf,
    pub streaming: StreamingConf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Probabilities {
    pub reconnect: f64,
    pub disconnect: f64,
    pub anomaly: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessConf {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationConf {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingConf {
    pub connect_attempts: u32,
    pub send_reconnect_attempts: u32,
    pub base_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device_count: 10,
            sensor_types: Vec::new(),
            target_url: String::new(),
            websocket_url: None,
            device_registration_url: None,
            data_push_interval_ms: 5000,
            control_addr: "0.0.0.0:8081".into(),
            seed: None,
            request_timeout_ms: 5000,
            probabilities: Probabilities::default(),
            readiness: ReadinessConf::default(),
            registration: RegistrationConf::default(),
            streaming: StreamingConf::default(),
        }
    }
}

impl Default for Probabilities {
    fn default() -> Self {
        Self { reconnect: 0.5, disconnect: 0.1, anomaly: 0.05 }
    }
}

impl Default for ReadinessConf {
    fn default() -> Self {
        Self { max_attempts: 20, delay_ms: 500 }
    }
}

impl Default for RegistrationConf {
    fn default() -> Self {
        Self { max_attempts: 5, retry_delay_ms: 400 }
    }
}

impl Default for StreamingConf {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            send_reconnect_attempts: 3,
            base_delay_ms: 200,
            connect_timeout_ms: 3000,
        }
    }
}

impl SimulatorConfig {
    /// Parses YAML, either flat or nested under a `simulator:` key.
    pub fn from_yaml(txt: &str) -> SimResult<Self> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut value: serde_yaml::Value = serde_yaml::from_str(txt)?;
        if let Some(inner) = value.get("simulator") {
            value = inner.clone();
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Applies `FLEETSIM_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> SimResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FLEETSIM_DEVICE_COUNT") {
            self.device_count = parse_var("FLEETSIM_DEVICE_COUNT", &v)?;
        }
        if let Some(v) = lookup("FLEETSIM_SENSOR_TYPES") {
            self.sensor_types = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("FLEETSIM_TARGET_URL") {
            self.target_url = v;
        }
        if let Some(v) = lookup("FLEETSIM_WEBSOCKET_URL") {
            self.websocket_url = Some(v);
        }
        if let Some(v) = lookup("FLEETSIM_REGISTRATION_URL") {
            self.device_registration_url = Some(v);
        }
        if let Some(v) = lookup("FLEETSIM_PUSH_INTERVAL_MS") {
            self.data_push_interval_ms = parse_var("FLEETSIM_PUSH_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("FLEETSIM_CONTROL_ADDR") {
            self.control_addr = v;
        }
        if let Some(v) = lookup("FLEETSIM_SEED") {
            self.seed = Some(parse_var("FLEETSIM_SEED", &v)?);
        }
        Ok(())
    }

    /// Startup checks. Missing sensor kinds or target URL are fatal.
    pub fn validate(&self) -> SimResult<()> {
        if self.sensor_types.iter().all(|s| s.trim().is_empty()) {
            return Err(SimError::IllegalState("Sensor types cannot be null or empty".into()));
        }
        if self.target_url.trim().is_empty() {
            return Err(SimError::IllegalState("Target URL cannot be null or empty".into()));
        }
        // Une cible illisible est fatale au même titre qu'une cible absente.
        parse_url(&self.target_url).map_err(|e| SimError::IllegalState(e.to_string()))?;
        if let Some(url) = self.explicit_registration_url() {
            parse_url(url)?;
        }
        for (name, p) in [
            ("reconnect", self.probabilities.reconnect),
            ("disconnect", self.probabilities.disconnect),
            ("anomaly", self.probabilities.anomaly),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimError::Config(format!("probability '{name}' out of [0,1]: {p}")));
            }
        }
        if self.data_push_interval_ms == 0 {
            return Err(SimError::Config("dataPushIntervalMs must be > 0".into()));
        }
        Ok(())
    }

    pub fn sensor_kinds(&self) -> Arc<[SensorKind]> {
        self.sensor_types
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| SensorKind::from(s.as_str()))
            .collect()
    }

    pub fn health_url(&self) -> SimResult<String> {
        replace_trailing_segment(&self.target_url, HEALTH_PATH)
    }

    pub fn registration_url(&self) -> SimResult<String> {
        match self.explicit_registration_url() {
            Some(url) => Ok(url.to_string()),
            None => replace_trailing_segment(&self.target_url, DEVICE_PATH),
        }
    }

    fn explicit_registration_url(&self) -> Option<&str> {
        self.device_registration_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.data_push_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Loads the config file named by `FLEETSIM_CONFIG` then applies env overrides.
pub async fn load_config() -> SimResult<SimulatorConfig> {
    let path = std::env::var("FLEETSIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = tokio::fs::read_to_string(&path).await?;
        info!("[config] loaded {path}");
        SimulatorConfig::from_yaml(&txt)?
    } else {
        warn!("[config] no {path}, using defaults and environment");
        SimulatorConfig::default()
    };
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(cfg)
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> SimResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SimError::Config(format!("invalid value for {name}: '{value}'")))
}

fn parse_url(url: &str) -> SimResult<Url> {
    Url::parse(url.trim()).map_err(|e| SimError::Url(format!("'{url}': {e}")))
}

/// "http://x/api/sensor" + "actuator/health" -> "http://x/api/actuator/health"
fn replace_trailing_segment(url: &str, replacement: &str) -> SimResult<String> {
    let mut parsed = parse_url(url)?;
    {
        let mut segments = parsed
            .path_segments_mut()
            .map_err(|_| SimError::Url(format!("'{url}' has no path")))?;
        segments.pop_if_empty().pop();
        segments.extend(replacement.split('/'));
    }
    Ok(parsed.to_string())
}
