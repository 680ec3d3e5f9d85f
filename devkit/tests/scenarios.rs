//! End-to-end scenarios: real controller, real HTTP request channel, fake
//! analyser, scripted streaming session.

use fleetsim::http::{build_router, AppState};
use fleetsim::models::Anomalous;
use fleetsim::streaming::SENSOR_DATA_TOPIC;
use fleetsim::{MetricsSnapshot, SensorKind, SimError};
use fleetsim_devkit::{MockStreamSession, ScriptedRandom, TestHarness};
use serde_json::Value;
use tokio::net::TcpListener;

/// 0.99 never triggers a disconnect, a reconnect (p=0.5) or an anomaly.
const QUIET: f64 = 0.99;

fn target_ids(readings: &[Value]) -> Vec<u64> {
    readings.iter().filter_map(|r| r["deviceId"].as_u64()).collect()
}

fn plausible(reading: &Value) -> bool {
    let kind = SensorKind::from(reading["sensorType"].as_str().unwrap_or_default());
    if reading["valid"] == false {
        return reading["value"].is_null();
    }
    let Some(value) = reading["value"].as_f64() else {
        return false;
    };
    let profile = kind.profile();
    let anomalous = match profile.anomalous {
        Anomalous::EitherOf(a, b) => value == a || value == b,
        Anomalous::Fixed(v) => value == v,
    };
    reading["unit"] == profile.unit && (profile.nominal.contains(value) || anomalous)
}

#[tokio::test]
async fn test_bootstrap_creates_ordered_fleet() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .devices(3)
        .sensors(&["TEMPERATURE", "HUMIDITY"])
        .build()
        .unwrap();

    let report = h.bootstrap().await.unwrap();
    assert_eq!(report.devices, 3);

    let views = h.controller.devices();
    assert_eq!(views.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    for view in &views {
        assert_eq!(view.sensor_types, vec![SensorKind::Temperature, SensorKind::Humidity]);
        assert!(view.connected);
    }
}

#[tokio::test]
async fn test_registration_assigns_remote_ids() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();

    h.bootstrap().await.unwrap();

    let registrations = h.analyser.registrations();
    assert_eq!(registrations.len(), 2);
    assert_eq!(registrations[0]["deviceName"], "Device-1");
    assert_eq!(registrations[1]["deviceName"], "Device-2");
    assert_eq!(registrations[0]["deviceType"], "TEMPERATURE");

    let views = h.controller.devices();
    assert_eq!(views[0].remote_id, Some(101));
    assert_eq!(views[1].remote_id, Some(102));

    let report = h.controller.scheduler().tick().await;
    assert_eq!(report.sent, 2);
    assert_eq!(target_ids(&h.analyser.readings()), vec![101, 102]);
}

#[tokio::test]
async fn test_registration_failure_keeps_local_id() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();
    h.analyser.reject_device("Device-1");

    let report = h.bootstrap().await.unwrap();
    assert_eq!(report.registration.registered, 1);
    assert_eq!(report.registration.degraded, vec![1]);
    // five tries for Device-1, one for Device-2
    assert_eq!(h.analyser.registrations().len(), 6);

    let views = h.controller.devices();
    assert_eq!(views[0].remote_id, None);
    assert_eq!(views[0].target_id, 1);
    assert_eq!(views[1].target_id, 101);

    h.controller.scheduler().tick().await;
    assert_eq!(target_ids(&h.analyser.readings()), vec![1, 101]);
}

#[tokio::test]
async fn test_readiness_waits_for_analyser() {
    let h = TestHarness::builder().await.unwrap().build().unwrap();
    h.analyser.fail_health_first(3);

    h.bootstrap().await.unwrap();
    assert_eq!(h.analyser.health_calls(), 4);
}

#[tokio::test]
async fn test_readiness_exhausted_aborts_bootstrap() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .configure(|c| c.readiness.max_attempts = 3)
        .build()
        .unwrap();
    h.analyser.fail_health_first(usize::MAX);

    let err = h.bootstrap().await.unwrap_err();
    assert!(matches!(err, SimError::IllegalState(_)));
    assert_eq!(h.analyser.health_calls(), 3);
    assert!(h.analyser.registrations().is_empty());
}

#[tokio::test]
async fn test_unreachable_stream_does_not_block_requests() {
    let session = MockStreamSession::unreachable();
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_session(session.clone())
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();

    let report = h.bootstrap().await.unwrap();
    assert!(!report.stream_connected);

    for round in 1..=2u64 {
        let tick = h.controller.scheduler().tick().await;
        assert_eq!(tick.sent, 2);
        assert_eq!(tick.streamed, 0);
        assert_eq!(h.metrics.snapshot().data_sent, 2 * round);
    }
    assert!(session.get_published_messages().is_empty());
    assert!(session.connect_calls() > 5);
}

#[tokio::test]
async fn test_connected_stream_mirrors_readings() {
    let session = MockStreamSession::refusing_first(1);
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_session(session.clone())
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();

    assert!(h.bootstrap().await.unwrap().stream_connected);

    let tick = h.controller.scheduler().tick().await;
    assert_eq!(tick.streamed, 2);

    let messages = session.find_messages_by_destination(SENSOR_DATA_TOPIC);
    assert_eq!(messages.len(), 2);
    let last: Value = session.get_last_json_message(SENSOR_DATA_TOPIC).unwrap().unwrap();
    assert_eq!(last["deviceId"], 102);
    assert_eq!(last["sensorType"], "TEMPERATURE");
}

#[tokio::test]
async fn test_forced_reconnect_restores_whole_fleet() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .devices(4)
        .configure(|c| c.probabilities.reconnect = 1.0)
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();
    h.bootstrap().await.unwrap();

    for id in 1..=4 {
        assert!(h.controller.disconnect_device(id));
    }

    let tick = h.controller.scheduler().tick().await;
    assert_eq!(tick.reconnects, 4);
    assert!(h.controller.devices().iter().all(|d| d.connected));
    assert_eq!(h.metrics.snapshot().reconnected, 4);
    assert!(h.analyser.readings().iter().all(|r| r["valid"] == true));
}

#[tokio::test]
async fn test_disconnected_device_sends_offline_heartbeat() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();
    h.bootstrap().await.unwrap();

    h.controller.disconnect_device(1);
    h.controller.scheduler().tick().await;

    let offline = h.analyser.readings_for(101);
    assert_eq!(offline.len(), 1);
    assert!(offline[0]["value"].is_null());
    assert_eq!(offline[0]["valid"], false);
    assert_eq!(offline[0]["unit"], "°C");

    let online = h.analyser.readings_for(102);
    assert_eq!(online[0]["valid"], true);
    assert!(plausible(&online[0]));
}

#[tokio::test]
async fn test_empty_fleet_ticks_do_nothing() {
    let h = TestHarness::builder().await.unwrap().devices(0).build().unwrap();

    let report = h.bootstrap().await.unwrap();
    assert_eq!(report.devices, 0);

    let tick = h.controller.scheduler().tick().await;
    assert_eq!(tick.readings, 0);
    assert_eq!(h.metrics.snapshot(), MetricsSnapshot::default());
    assert!(h.analyser.readings().is_empty());
}

#[tokio::test]
async fn test_seeded_run_stays_within_profiles() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .devices(3)
        .sensors(&["TEMPERATURE", "HUMIDITY", "MOTION", "PRESSURE"])
        .configure(|c| c.probabilities.anomaly = 0.3)
        .build()
        .unwrap();
    h.bootstrap().await.unwrap();

    for _ in 0..20 {
        h.controller.scheduler().tick().await;
    }

    let readings = h.analyser.readings();
    assert_eq!(readings.len(), 60);
    for reading in &readings {
        assert!(plausible(reading), "implausible reading {reading}");
    }
}

#[tokio::test]
async fn test_periodic_task_drives_ticks() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();
    h.bootstrap().await.unwrap();

    h.controller.start_scheduler();
    h.wait_for_readings(4, 2000).await.unwrap();

    h.controller.stop_simulation();
    h.controller.shutdown().await;
    assert!(h.metrics.snapshot().data_sent >= 4);
}

async fn serve_control(h: &TestHarness, api_key: Option<&str>) -> String {
    let app = build_router(AppState {
        controller: h.controller.clone(),
        metrics: h.metrics.clone(),
        api_key: api_key.map(str::to_string),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

async fn post(client: &reqwest::Client, url: String) -> u16 {
    client.post(url).send().await.unwrap().status().as_u16()
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    client.get(url).send().await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn test_control_api_manual_actions() {
    let h = TestHarness::builder()
        .await
        .unwrap()
        .with_random(ScriptedRandom::constant(QUIET))
        .build()
        .unwrap();
    h.bootstrap().await.unwrap();
    let base = serve_control(&h, None).await;
    let client = reqwest::Client::new();

    assert_eq!(post(&client, format!("{base}/devices/1/anomaly")).await, 204);
    let sent = h.analyser.readings_for(101);
    assert_eq!(sent.len(), 1);
    // QUIET picks the second value of the coin flip
    assert_eq!(sent[0]["value"], 150.0);
    assert_eq!(sent[0]["valid"], true);

    assert_eq!(post(&client, format!("{base}/devices/9/anomaly")).await, 404);

    assert_eq!(post(&client, format!("{base}/devices/2/disconnect")).await, 204);
    assert!(!h.controller.device(2).unwrap().connected);

    assert_eq!(post(&client, format!("{base}/simulation/stop")).await, 204);
    let sim = get_json(&client, format!("{base}/simulation")).await;
    assert_eq!(sim["enabled"], false);
    assert_eq!(sim["devices"], 2);

    let metrics = get_json(&client, format!("{base}/metrics")).await;
    assert_eq!(metrics["anomalies"], 1);
    assert_eq!(metrics["data_sent"], 0);
}

#[tokio::test]
async fn test_control_api_key_guard() {
    let h = TestHarness::builder().await.unwrap().build().unwrap();
    h.bootstrap().await.unwrap();
    let base = serve_control(&h, Some("s3cret")).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 200);

    let denied = client.get(format!("{base}/devices")).send().await.unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let devices: Vec<Value> = client
        .get(format!("{base}/devices"))
        .header("x-api-key", "s3cret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["targetId"], 101);
}
