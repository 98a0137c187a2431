//! Simulated printer link shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mx10::{DeviceSession, NotifyCallback, SessionConfig, Transport, TransportError};
use uuid::Uuid;

pub const ADDRESS: &str = "A1:11:02:23:64:0D";

type SharedCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Default)]
struct State {
    connected: bool,
    writes: Vec<(Uuid, Vec<u8>)>,
    subscriptions: Vec<Uuid>,
    callback: Option<SharedCallback>,
    next_write_error: Option<TransportError>,
    subscribe_error: Option<TransportError>,
    disconnects: usize,
}

/// In-memory transport. Clones share state, so a test can keep a handle
/// after moving one into a session.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Written frames, characteristic dropped.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|(_, f)| f).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn fail_next_write(&self, err: TransportError) {
        self.state.lock().unwrap().next_write_error = Some(err);
    }

    pub fn fail_subscribe(&self, err: TransportError) {
        self.state.lock().unwrap().subscribe_error = Some(err);
    }

    /// Push raw bytes down the notify path, as the device would.
    pub fn notify(&self, raw: &[u8]) {
        let callback = self.state.lock().unwrap().callback.clone();
        if let Some(cb) = callback {
            cb(raw);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, address: &str, discovery_timeout: Duration) -> Result<(), TransportError> {
        if address != ADDRESS {
            tokio::time::sleep(discovery_timeout).await;
            return Err(TransportError::DeviceNotFound {
                address: address.to_string(),
                timeout: discovery_timeout,
            });
        }
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.callback = None;
        state.subscriptions.clear();
        state.disconnects += 1;
        Ok(())
    }

    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.next_write_error.take() {
            return Err(err);
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.writes.push((characteristic, data.to_vec()));
        Ok(())
    }

    async fn subscribe(&mut self, characteristic: Uuid, on_notify: NotifyCallback) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.subscribe_error.take() {
            return Err(err);
        }
        state.subscriptions.push(characteristic);
        state.callback = Some(Arc::from(on_notify));
        Ok(())
    }
}

pub fn config() -> SessionConfig {
    SessionConfig::new(ADDRESS)
}

/// A connected session plus a handle onto its transport.
pub async fn connected_session() -> (DeviceSession<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    let mut session = DeviceSession::new(mock.clone(), config());
    session.connect().await.expect("mock connect");
    (session, mock)
}
