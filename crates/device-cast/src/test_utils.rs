//! In-memory connection for exercising sessions and the registry

use crate::connection::{CastConnection, TransportEvent};
use crate::error::TransportError;
use crate::registry::SessionFactory;
use crate::session::{SessionConfig, SessionHandle};
use async_trait::async_trait;
use bytes::Bytes;
use cast_protocol::{decode_envelope, CastMessage, MediaInformation, LENGTH_PREFIX_LEN};
use castaudio_core::{ConnectionState, DeviceDescriptor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every frame written while connected and lets tests inject
/// receiver messages and connection failures.
pub struct MockConnection {
    state: Mutex<ConnectionState>,
    endpoint: Mutex<(String, u16)>,
    sent: Mutex<Vec<Bytes>>,
    parked: Mutex<Vec<Bytes>>,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    disposals: AtomicUsize,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockConnection {
    pub fn new(
        host: impl Into<String>,
        port: u16,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            state: Mutex::new(ConnectionState::Disconnected),
            endpoint: Mutex::new((host.into(), port)),
            sent: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
            events: events_tx,
        });
        (connection, events_rx)
    }

    /// Make subsequent connects fail
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Change state the way a real transport would, including the event
    pub fn set_state(&self, state: ConnectionState, detail: Option<String>) {
        self.set_state_quietly(state);
        self.emit_state(state, detail);
    }

    /// Change state but leave the event undelivered, like a failure whose
    /// event is still queued behind other work
    pub fn set_state_quietly(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Deliver the event for a state set with [`Self::set_state_quietly`]
    pub fn emit_state(&self, state: ConnectionState, detail: Option<String>) {
        let _ = self.events.send(TransportEvent::StateChanged { state, detail });
    }

    /// Deliver a message as if the receiver had sent it
    pub fn inject(&self, message: CastMessage) {
        let _ = self.events.send(TransportEvent::Message(message));
    }

    /// Decoded frames written while connected, in order
    pub fn sent_messages(&self) -> Vec<CastMessage> {
        decode_all(&lock(&self.sent))
    }

    /// Like [`Self::sent_messages`] but clears the record
    pub fn take_sent(&self) -> Vec<CastMessage> {
        let frames = std::mem::take(&mut *lock(&self.sent));
        decode_all(&frames)
    }

    /// Frames handed over while not connected
    pub fn parked_messages(&self) -> Vec<CastMessage> {
        decode_all(&lock(&self.parked))
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> (String, u16) {
        lock(&self.endpoint).clone()
    }
}

fn decode_all(frames: &[Bytes]) -> Vec<CastMessage> {
    frames
        .iter()
        .filter_map(|frame| decode_envelope(frame.get(LENGTH_PREFIX_LEN..)?).ok())
        .collect()
}

#[async_trait]
impl CastConnection for MockConnection {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_endpoint(&self, host: &str, port: u16) {
        *lock(&self.endpoint) = (host.to_string(), port);
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.state().is_connected() {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting, None);
        if self.fail_connect.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Error, Some(TransportError::NotConnected.to_string()));
            return Err(TransportError::NotConnected);
        }
        self.set_state(ConnectionState::Connected, None);
        Ok(())
    }

    fn send(&self, frame: Bytes) {
        if self.state().is_connected() {
            lock(&self.sent).push(frame);
        } else {
            lock(&self.parked).push(frame);
        }
    }

    async fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected, None);
        }
    }
}

/// Mock connections created by a [`mock_factory`], keyed by device id
pub type MockConnections = Arc<Mutex<HashMap<String, Arc<MockConnection>>>>;

/// Session factory that backs every session with a [`MockConnection`]
pub fn mock_factory(media: MediaInformation) -> (SessionFactory, MockConnections) {
    let connections: MockConnections = Arc::new(Mutex::new(HashMap::new()));
    let created = Arc::clone(&connections);
    let factory: SessionFactory = Arc::new(move |device: &DeviceDescriptor| {
        let (connection, events) = MockConnection::new(device.host.clone(), device.port);
        lock(&created).insert(device.id.clone(), Arc::clone(&connection));
        SessionHandle::spawn(
            device.clone(),
            SessionConfig::new(media.clone()),
            connection,
            events,
        )
    });
    (factory, connections)
}

/// Look up the mock behind a device's session
pub fn mock_for(connections: &MockConnections, id: &str) -> Option<Arc<MockConnection>> {
    lock(connections).get(id).cloned()
}
