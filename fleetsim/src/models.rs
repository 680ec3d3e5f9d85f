use crate::rng::RandomSource;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use time::OffsetDateTime;

/// Device type sent at registration when a device owns no sensor kind.
pub const UNKNOWN_DEVICE_TYPE: &str = "UNKNOWN";

/// Sensor kinds understood by the generator table. Names that are not one of
/// the known kinds are kept verbatim in `Other` and use the fallback profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Motion,
    Other(String),
}

impl SensorKind {
    pub fn as_str(&self) -> &str {
        match self {
            SensorKind::Temperature => "TEMPERATURE",
            SensorKind::Humidity => "HUMIDITY",
            SensorKind::Motion => "MOTION",
            SensorKind::Other(name) => name,
        }
    }

    pub fn profile(&self) -> &'static SensorProfile {
        match self {
            SensorKind::Temperature => &TEMPERATURE,
            SensorKind::Humidity => &HUMIDITY,
            SensorKind::Motion => &MOTION,
            SensorKind::Other(_) => &FALLBACK,
        }
    }

    pub fn unit(&self) -> &'static str {
        self.profile().unit
    }

    pub fn nominal_value(&self, rng: &dyn RandomSource) -> f64 {
        self.profile().nominal.sample(rng)
    }

    pub fn anomalous_value(&self, rng: &dyn RandomSource) -> f64 {
        self.profile().anomalous.sample(rng)
    }
}

impl From<String> for SensorKind {
    fn from(name: String) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "TEMPERATURE" => SensorKind::Temperature,
            "HUMIDITY" => SensorKind::Humidity,
            "MOTION" => SensorKind::Motion,
            _ => SensorKind::Other(name),
        }
    }
}

impl From<&str> for SensorKind {
    fn from(name: &str) -> Self {
        SensorKind::from(name.to_string())
    }
}

impl From<SensorKind> for String {
    fn from(kind: SensorKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distribution of in-range values for a kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Nominal {
    /// Uniform over `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// `1.0` with probability `p`, else `0.0`.
    Bernoulli { p: f64 },
    Constant(f64),
}

impl Nominal {
    pub fn sample(&self, rng: &dyn RandomSource) -> f64 {
        match *self {
            Nominal::Uniform { low, high } => low + rng.next_f64() * (high - low),
            Nominal::Bernoulli { p } => {
                if rng.chance(p) {
                    1.0
                } else {
                    0.0
                }
            }
            Nominal::Constant(v) => v,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        match *self {
            Nominal::Uniform { low, high } => (low..high).contains(&value),
            Nominal::Bernoulli { .. } => value == 0.0 || value == 1.0,
            Nominal::Constant(v) => value == v,
        }
    }
}

/// Out-of-range value policy for a kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomalous {
    /// Coin flip between the two values.
    EitherOf(f64, f64),
    Fixed(f64),
}

impl Anomalous {
    pub fn sample(&self, rng: &dyn RandomSource) -> f64 {
        match *self {
            Anomalous::EitherOf(a, b) => {
                if rng.next_bool() {
                    a
                } else {
                    b
                }
            }
            Anomalous::Fixed(v) => v,
        }
    }
}

/// One row of the generation table.
#[derive(Debug)]
pub struct SensorProfile {
    pub nominal: Nominal,
    pub anomalous: Anomalous,
    pub unit: &'static str,
}

static TEMPERATURE: SensorProfile = SensorProfile {
    nominal: Nominal::Uniform { low: 20.0, high: 40.0 },
    anomalous: Anomalous::EitherOf(-50.0, 150.0),
    unit: "°C",
};

static HUMIDITY: SensorProfile = SensorProfile {
    nominal: Nominal::Uniform { low: 30.0, high: 90.0 },
    anomalous: Anomalous::EitherOf(0.0, 120.0),
    unit: "%",
};

static MOTION: SensorProfile = SensorProfile {
    nominal: Nominal::Bernoulli { p: 0.2 },
    anomalous: Anomalous::Fixed(2.0),
    unit: "binary",
};

static FALLBACK: SensorProfile = SensorProfile {
    nominal: Nominal::Constant(0.0),
    anomalous: Anomalous::Fixed(9999.0),
    unit: "",
};

/// One simulated device.
///
/// `id` is immutable, `remote_id` can be set once, `connected` is a plain
/// last-write-wins flag shared between the scheduler and the controller.
#[derive(Debug)]
pub struct Device {
    id: u64,
    remote_id: OnceLock<u64>,
    sensor_kinds: Arc<[SensorKind]>,
    connected: AtomicBool,
}

impl Device {
    pub fn new(id: u64, sensor_kinds: Arc<[SensorKind]>) -> Self {
        Self {
            id,
            remote_id: OnceLock::new(),
            sensor_kinds,
            connected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_id(&self) -> Option<u64> {
        self.remote_id.get().copied()
    }

    /// Stores the downstream-assigned id. Returns false if one was already set.
    pub fn set_remote_id(&self, remote_id: u64) -> bool {
        self.remote_id.set(remote_id).is_ok()
    }

    /// Id used on the wire: remote id when registered, local id otherwise.
    pub fn target_id(&self) -> u64 {
        self.remote_id().unwrap_or(self.id)
    }

    pub fn sensor_kinds(&self) -> &[SensorKind] {
        &self.sensor_kinds
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sets the flag and returns the previous value.
    pub fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::Relaxed)
    }

    pub fn device_name(&self) -> String {
        format!("Device-{}", self.id)
    }

    pub fn device_type(&self) -> &str {
        self.sensor_kinds
            .first()
            .map(SensorKind::as_str)
            .unwrap_or(UNKNOWN_DEVICE_TYPE)
    }

    pub fn view(&self) -> DeviceView {
        DeviceView {
            id: self.id,
            remote_id: self.remote_id(),
            target_id: self.target_id(),
            connected: self.is_connected(),
            sensor_types: self.sensor_kinds.to_vec(),
        }
    }
}

/// Snapshot of a device for the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub id: u64,
    pub remote_id: Option<u64>,
    pub target_id: u64,
    pub connected: bool,
    pub sensor_types: Vec<SensorKind>,
}

/// Reading sent on both delivery channels. Never stored.
///
/// `value` is NaN for an offline heartbeat; serde_json writes it as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(rename = "deviceId")]
    pub target_id: u64,
    #[serde(deserialize_with = "nan_from_null")]
    pub value: f64,
    #[serde(rename = "sensorType")]
    pub sensor_kind: SensorKind,
    pub unit: String,
    pub valid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Reading {
    pub fn online(target_id: u64, sensor_kind: SensorKind, value: f64) -> Self {
        Self {
            target_id,
            value,
            unit: sensor_kind.unit().to_string(),
            sensor_kind,
            valid: true,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn offline(target_id: u64, sensor_kind: SensorKind) -> Self {
        Self {
            target_id,
            value: f64::NAN,
            unit: sensor_kind.unit().to_string(),
            sensor_kind,
            valid: false,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_offline_heartbeat(&self) -> bool {
        !self.valid && self.value.is_nan()
    }
}

fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Body of `POST {registrationUrl}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub device_name: String,
    pub device_type: String,
}

impl RegistrationRequest {
    pub fn for_device(device: &Device) -> Self {
        Self {
            device_name: device.device_name(),
            device_type: device.device_type().to_string(),
        }
    }
}

/// Body of the 201 answer to a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(alias = "id")]
    pub device_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRandom;

    fn kinds(names: &[&str]) -> Arc<[SensorKind]> {
        names.iter().map(|n| SensorKind::from(*n)).collect()
    }

    #[test]
    fn test_sensor_kind_parsing() {
        assert_eq!(SensorKind::from("temperature"), SensorKind::Temperature);
        assert_eq!(SensorKind::from("HUMIDITY"), SensorKind::Humidity);
        assert_eq!(SensorKind::from("MOTION"), SensorKind::Motion);
        assert_eq!(SensorKind::from("PRESSURE"), SensorKind::Other("PRESSURE".into()));
        assert_eq!(SensorKind::Other("PRESSURE".into()).as_str(), "PRESSURE");
    }

    #[test]
    fn test_units() {
        assert_eq!(SensorKind::Temperature.unit(), "°C");
        assert_eq!(SensorKind::Humidity.unit(), "%");
        assert_eq!(SensorKind::Motion.unit(), "binary");
        assert_eq!(SensorKind::from("CO2").unit(), "");
    }

    #[test]
    fn test_nominal_values_in_range() {
        let rng = SeededRandom::from_seed(1);
        for kind in [
            SensorKind::Temperature,
            SensorKind::Humidity,
            SensorKind::Motion,
            SensorKind::from("CO2"),
        ] {
            for _ in 0..500 {
                let v = kind.nominal_value(&rng);
                assert!(kind.profile().nominal.contains(v), "{kind}: {v}");
            }
        }
    }

    #[test]
    fn test_anomalous_values_out_of_range() {
        let rng = SeededRandom::from_seed(2);
        for _ in 0..200 {
            let t = SensorKind::Temperature.anomalous_value(&rng);
            assert!(t == -50.0 || t == 150.0);
            let h = SensorKind::Humidity.anomalous_value(&rng);
            assert!(h == 0.0 || h == 120.0);
            assert!(!SensorKind::Humidity.profile().nominal.contains(h));
        }
        assert_eq!(SensorKind::Motion.anomalous_value(&rng), 2.0);
        assert_eq!(SensorKind::from("CO2").anomalous_value(&rng), 9999.0);
    }

    #[test]
    fn test_device_remote_id_set_once() {
        let device = Device::new(3, kinds(&["TEMPERATURE"]));
        assert_eq!(device.target_id(), 3);
        assert!(device.set_remote_id(103));
        assert!(!device.set_remote_id(999));
        assert_eq!(device.remote_id(), Some(103));
        assert_eq!(device.target_id(), 103);
    }

    #[test]
    fn test_device_type_and_name() {
        let device = Device::new(7, kinds(&["HUMIDITY", "MOTION"]));
        assert_eq!(device.device_name(), "Device-7");
        assert_eq!(device.device_type(), "HUMIDITY");

        let empty = Device::new(8, kinds(&[]));
        assert_eq!(empty.device_type(), UNKNOWN_DEVICE_TYPE);
    }

    #[test]
    fn test_offline_reading_json_uses_null() {
        let reading = Reading::offline(5, SensorKind::Motion);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["deviceId"], 5);
        assert!(json["value"].is_null());
        assert_eq!(json["sensorType"], "MOTION");
        assert_eq!(json["unit"], "binary");
        assert_eq!(json["valid"], false);

        let back: Reading = serde_json::from_value(json).unwrap();
        assert!(back.is_offline_heartbeat());
    }

    #[test]
    fn test_registration_response_accepts_id_alias() {
        let a: RegistrationResponse = serde_json::from_str(r#"{"deviceId": 101}"#).unwrap();
        let b: RegistrationResponse = serde_json::from_str(r#"{"id": 102, "name": "x"}"#).unwrap();
        assert_eq!(a.device_id, 101);
        assert_eq!(b.device_id, 102);
    }
}
