//! fleetsim - IoT device fleet emulator.
//!
//! Drives a fleet of simulated sensor devices against a telemetry analyser:
//! readiness probing, one-shot registration, then periodic readings sent on a
//! request/response channel and a streaming channel, with random connectivity
//! flips and injected anomalies.

pub mod config;
pub mod controller;
pub mod downstream;
pub mod error;
pub mod http;
pub mod metrics;
pub mod models;
pub mod readiness;
pub mod registration;
pub mod rng;
pub mod scheduler;
pub mod state;
pub mod streaming;

#[cfg(test)]
mod testing;

pub use config::SimulatorConfig;
pub use controller::{BootstrapReport, Collaborators, FleetController};
pub use error::{SimError, SimResult};
pub use metrics::{FleetMetrics, MetricsSink, MetricsSnapshot};
pub use models::{Device, DeviceView, Reading, SensorKind};
pub use rng::{RandomSource, SeededRandom};
pub use scheduler::{PeriodicTask, Scheduler, TickReport};
pub use streaming::{StreamSession, StreamingChannel};
