/**
 * CANAL STREAMING - Session de publication persistante (MQTT)
 *
 * RÔLE :
 * Deuxième canal de livraison des lectures, best-effort, isolé du canal HTTP.
 *
 * FONCTIONNEMENT :
 * - États : Disconnected → Connecting → Connected, retour à Disconnected sur
 *   erreur de transport ou déconnexion explicite
 * - connect_with_retry : backoff linéaire (base × n° de tentative), une seule
 *   tentative de connexion en vol à la fois
 * - send : reconnexion inline bornée si besoin, sinon log + drop ; aucune
 *   erreur ne remonte à l'appelant
 * - Après un échec de reconnexion inline, les send suivants droppent sans
 *   retenter pendant `reconnect_cooldown` (une seule reconnexion par tick)
 * - La session est opaque (connect / send / disconnect / is_connected) :
 *   MqttSession en prod, doubles scriptés dans les tests
 */

use crate::error::{SimError, SimResult};
use crate::models::Reading;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Single destination for every reading published on the streaming channel.
pub const SENSOR_DATA_TOPIC: &str = "app/sensorData";

#[async_trait]
pub trait StreamSession: Send + Sync {
    /// One handshake; Ok once the broker acknowledged the connection.
    async fn connect(&self) -> SimResult<()>;
    async fn send(&self, destination: &str, payload: Vec<u8>) -> SimResult<()>;
    /// Graceful teardown; no-op when nothing is open.
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct StreamPolicy {
    /// Attempts made inline by `send` when the session is down.
    pub send_reconnect_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
    /// Quiet period after a failed inline reconnect.
    pub reconnect_cooldown: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            send_reconnect_attempts: 3,
            base_delay: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(3),
            reconnect_cooldown: Duration::from_secs(5),
        }
    }
}

pub struct StreamingChannel {
    session: Arc<dyn StreamSession>,
    state: Mutex<ChannelState>,
    connect_lock: tokio::sync::Mutex<()>,
    inline_failed_at: Mutex<Option<Instant>>,
    policy: StreamPolicy,
}

impl StreamingChannel {
    pub fn new(session: Arc<dyn StreamSession>, policy: StreamPolicy) -> Self {
        Self {
            session,
            state: Mutex::new(ChannelState::Disconnected),
            connect_lock: tokio::sync::Mutex::new(()),
            inline_failed_at: Mutex::new(None),
            policy,
        }
    }

    pub fn state(&self) -> ChannelState {
        let mut state = self.state.lock();
        if *state == ChannelState::Connected && !self.session.is_connected() {
            *state = ChannelState::Disconnected;
        }
        *state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    fn set_state(&self, next: ChannelState) {
        *self.state.lock() = next;
    }

    /// Tries up to `max_attempts` handshakes, sleeping `base_delay × attempt`
    /// between them. Concurrent callers queue behind the one in flight.
    pub async fn connect_with_retry(&self, max_attempts: u32, base_delay: Duration) -> bool {
        let _in_flight = self.connect_lock.lock().await;
        if self.session.is_connected() {
            self.set_state(ChannelState::Connected);
            return true;
        }

        for attempt in 1..=max_attempts {
            self.set_state(ChannelState::Connecting);
            let outcome = tokio::time::timeout(self.policy.connect_timeout, self.session.connect())
                .await
                .unwrap_or_else(|_| Err(SimError::Stream("connect timed out".into())));

            match outcome {
                Ok(()) => {
                    self.set_state(ChannelState::Connected);
                    self.inline_failed_at.lock().take();
                    info!("[stream] connected (attempt {attempt}/{max_attempts})");
                    return true;
                }
                Err(e) => {
                    self.set_state(ChannelState::Disconnected);
                    warn!("[stream] connect attempt {attempt}/{max_attempts} failed: {e}");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(base_delay * attempt).await;
            }
        }
        false
    }

    /// Best-effort publish. Returns whether the reading left the process.
    pub async fn send(&self, reading: &Reading) -> bool {
        if !self.is_connected() {
            if self.cooling_down() {
                debug!(
                    "[stream] reconnect on cooldown, dropping reading for {}",
                    reading.target_id
                );
                return false;
            }
            debug!("[stream] not connected, reconnecting inline");
            let reconnected = self
                .connect_with_retry(self.policy.send_reconnect_attempts, self.policy.base_delay)
                .await;
            if !reconnected {
                *self.inline_failed_at.lock() = Some(Instant::now());
                warn!("[stream] not connected, dropping reading for {}", reading.target_id);
                return false;
            }
        }

        let payload = match serde_json::to_vec(reading) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[stream] cannot encode reading for {}: {e}", reading.target_id);
                return false;
            }
        };

        match self.session.send(SENSOR_DATA_TOPIC, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[stream] publish to {SENSOR_DATA_TOPIC} failed: {e}");
                false
            }
        }
    }

    fn cooling_down(&self) -> bool {
        self.inline_failed_at
            .lock()
            .is_some_and(|at| at.elapsed() < self.policy.reconnect_cooldown)
    }

    /// Idempotent.
    pub async fn disconnect(&self) {
        let _in_flight = self.connect_lock.lock().await;
        if self.session.is_connected() {
            self.session.disconnect().await;
            info!("[stream] disconnected");
        }
        self.set_state(ChannelState::Disconnected);
    }
}

struct ActiveSession {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

/// rumqttc-backed session. `ws://`/`wss://` URLs use MQTT over WebSocket,
/// `mqtt://`/`tcp://`/`mqtts://` plain or TLS MQTT.
pub struct MqttSession {
    options: MqttOptions,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    connected: Arc<AtomicBool>,
}

impl MqttSession {
    pub fn from_url(url: &str, client_id: &str) -> SimResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| SimError::Config(format!("invalid websocketUrl '{url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SimError::Config(format!("websocketUrl has no host: {url}")))?
            .to_string();

        let mut options = match parsed.scheme() {
            "ws" | "wss" => {
                let port = parsed.port_or_known_default().unwrap_or(80);
                let mut options = MqttOptions::new(client_id, url, port);
                if parsed.scheme() == "wss" {
                    options.set_transport(Transport::wss_with_default_config());
                } else {
                    options.set_transport(Transport::Ws);
                }
                options
            }
            "mqtt" | "tcp" => MqttOptions::new(client_id, host, parsed.port().unwrap_or(1883)),
            "mqtts" | "ssl" => {
                let mut options = MqttOptions::new(client_id, host, parsed.port().unwrap_or(8883));
                options.set_transport(Transport::tls_with_default_config());
                options
            }
            other => {
                return Err(SimError::Config(format!("unsupported streaming scheme '{other}'")))
            }
        };
        options.set_keep_alive(Duration::from_secs(15));
        options.set_clean_session(true);

        Ok(Self {
            options,
            active: tokio::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl StreamSession for MqttSession {
    async fn connect(&self) -> SimResult<()> {
        let mut active = self.active.lock().await;
        if let Some(stale) = active.take() {
            stale.poller.abort();
        }
        self.connected.store(false, Ordering::Relaxed);

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 64);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(SimError::Stream(format!("connection refused: {:?}", ack.code)));
                }
                Ok(_) => {}
                Err(e) => return Err(SimError::Stream(e.to_string())),
            }
        }
        self.connected.store(true, Ordering::Relaxed);

        // l'eventloop doit être pollé pour que les publish partent
        let connected = self.connected.clone();
        let poller = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("[stream] transport error: {e}");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::Relaxed);
        });

        *active = Some(ActiveSession { client, poller });
        Ok(())
    }

    async fn send(&self, destination: &str, payload: Vec<u8>) -> SimResult<()> {
        let active = self.active.lock().await;
        let Some(session) = active.as_ref() else {
            return Err(SimError::Stream("no active session".into()));
        };
        session
            .client
            .publish(destination, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SimError::Stream(e.to_string()))
    }

    async fn disconnect(&self) {
        let Some(mut session) = self.active.lock().await.take() else {
            return;
        };
        if let Err(e) = session.client.disconnect().await {
            debug!("[stream] disconnect request failed: {e}");
        }
        if tokio::time::timeout(Duration::from_millis(500), &mut session.poller)
            .await
            .is_err()
        {
            session.poller.abort();
        }
        self.connected.store(false, Ordering::Relaxed);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
