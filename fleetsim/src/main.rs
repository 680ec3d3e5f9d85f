/**
 * FLEETSIM - Point d'entrée du simulateur
 *
 * RÔLE : charge la config, bootstrap la flotte (readiness → registration →
 * streaming), lance le scheduler et l'API de contrôle.
 * ARRÊT : Ctrl-C → arrêt du serveur, du scheduler et de la session streaming.
 */

use anyhow::{Context, Result};
use fleetsim::config::load_config;
use fleetsim::http::{self, AppState};
use fleetsim::{Collaborators, FleetController, FleetMetrics};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleetsim=info")),
        )
        .init();

    let config = load_config().await.context("loading simulator config")?;
    info!(
        "[bootstrap] {} devices, sensors {:?}, target {}",
        config.device_count, config.sensor_types, config.target_url
    );

    let metrics = FleetMetrics::shared();
    let deps = Collaborators::from_config(&config, metrics.clone())
        .context("building downstream channels")?;
    let control_addr = config.control_addr.clone();
    let controller = Arc::new(FleetController::new(config, deps));

    let report = controller.bootstrap().await.context("bootstrap failed")?;
    info!(
        "[bootstrap] ready: {} devices, {} registered, stream connected={}",
        report.devices, report.registration.registered, report.stream_connected
    );

    controller.start_scheduler();

    let metrics_at_exit = metrics.clone();
    let app = http::build_router(AppState {
        controller: controller.clone(),
        metrics: metrics.clone(),
        api_key: std::env::var("FLEETSIM_API_KEY").ok().filter(|k| !k.is_empty()),
    });

    let listener = TcpListener::bind(&control_addr)
        .await
        .with_context(|| format!("binding control API on {control_addr}"))?;
    info!("[control] listening on http://{control_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("[control] Ctrl-C received, shutting down");
        })
        .await
        .context("control API failed")?;

    controller.shutdown().await;
    for (name, value) in metrics_at_exit.snapshot().named() {
        info!("[control] {name} = {value}");
    }
    Ok(())
}
