/*!
Session streaming simulée, sans broker

Implémente `StreamSession` en mémoire : les handshakes peuvent être refusés,
chaque publication est enregistrée pour les assertions.
*/

use async_trait::async_trait;
use fleetsim::error::{SimError, SimResult};
use fleetsim::streaming::StreamSession;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub destination: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Accept,
    RefuseFirst(usize),
    RefuseAlways,
}

/// Mock qui simule une session MQTT/WebSocket vers l'analyser.
#[derive(Clone)]
pub struct MockStreamSession {
    handshake: Arc<Mutex<Handshake>>,
    connected: Arc<AtomicBool>,
    connect_calls: Arc<AtomicUsize>,
    published: Arc<Mutex<Vec<MockMessage>>>,
}

impl MockStreamSession {
    fn with_handshake(handshake: Handshake) -> Self {
        Self {
            handshake: Arc::new(Mutex::new(handshake)),
            connected: Arc::new(AtomicBool::new(false)),
            connect_calls: Arc::new(AtomicUsize::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn new() -> Self {
        Self::with_handshake(Handshake::Accept)
    }

    /// Every handshake fails.
    pub fn unreachable() -> Self {
        Self::with_handshake(Handshake::RefuseAlways)
    }

    pub fn refusing_first(count: usize) -> Self {
        Self::with_handshake(Handshake::RefuseFirst(count))
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published.lock().clone()
    }

    pub fn find_messages_by_destination(&self, destination: &str) -> Vec<MockMessage> {
        self.published
            .lock()
            .iter()
            .filter(|msg| msg.destination == destination)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'une destination en JSON
    pub fn get_last_json_message<T>(&self, destination: &str) -> anyhow::Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_destination(destination).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn into_shared(self) -> Arc<dyn StreamSession> {
        Arc::new(self)
    }
}

impl Default for MockStreamSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamSession for MockStreamSession {
    async fn connect(&self) -> SimResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut handshake = self.handshake.lock();
        match *handshake {
            Handshake::RefuseAlways => {
                return Err(SimError::Stream("[MOCK] broker unreachable".into()))
            }
            Handshake::RefuseFirst(n) if n > 0 => {
                *handshake = Handshake::RefuseFirst(n - 1);
                return Err(SimError::Stream("[MOCK] handshake refused".into()));
            }
            _ => {}
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("[MOCK] stream session connected");
        Ok(())
    }

    async fn send(&self, destination: &str, payload: Vec<u8>) -> SimResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SimError::Stream("[MOCK] not connected".into()));
        }
        tracing::debug!("[MOCK] published to {destination}: {} bytes", payload.len());
        self.published.lock().push(MockMessage {
            destination: destination.to_string(),
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
