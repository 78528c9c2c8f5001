use crate::connection::TransportConfig;
use crate::session::{SessionConfig, SessionHandle};
use crate::transport::TlsTransport;
use async_trait::async_trait;
use castaudio_core::{DeviceControl, DeviceDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Builds the session for a newly discovered device
pub type SessionFactory = Arc<dyn Fn(&DeviceDescriptor) -> SessionHandle + Send + Sync>;

/// Registry changes for listeners such as a device list
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    DeviceAdded(DeviceDescriptor),
    /// A known device was re-discovered with different fields
    DeviceUpdated(DeviceDescriptor),
    ActiveChanged(String),
}

#[derive(Clone)]
pub struct DeviceEntry {
    pub descriptor: DeviceDescriptor,
    pub session: SessionHandle,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Known receivers, one session each, plus the device user actions go to.
///
/// The first device registered becomes active. The [`DeviceControl`] impl
/// forwards to the active device's session and does nothing when there is
/// none.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceEntry>>,
    active: RwLock<Option<String>>,
    factory: SessionFactory,
    events: broadcast::Sender<RegistryEvent>,
}

impl DeviceRegistry {
    pub fn new(factory: SessionFactory) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            devices: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            factory,
            events,
        }
    }

    /// Registry whose sessions talk TLS to real receivers
    pub fn with_cast_sessions<F>(transport: TransportConfig, session_config: F) -> Self
    where
        F: Fn(&DeviceDescriptor) -> SessionConfig + Send + Sync + 'static,
    {
        let factory = move |device: &DeviceDescriptor| {
            let (connection, events) =
                TlsTransport::channel(device.host.clone(), device.port, transport.clone());
            SessionHandle::spawn(
                device.clone(),
                session_config(device),
                Arc::new(connection),
                events,
            )
        };
        Self::new(Arc::new(factory))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a new device, or refresh a known one without touching its session state
    pub fn on_device_discovered(&self, device: DeviceDescriptor) {
        let event = {
            let mut devices = write(&self.devices);
            match devices.get_mut(&device.id) {
                Some(entry) if entry.descriptor == device => {
                    trace!("{} re-discovered unchanged", device.name);
                    return;
                }
                Some(entry) => {
                    info!(
                        "Device {} moved from {} to {}",
                        device.name,
                        entry.descriptor.endpoint(),
                        device.endpoint()
                    );
                    entry.descriptor = device.clone();
                    entry.session.update_device(device.clone());
                    RegistryEvent::DeviceUpdated(device)
                }
                None => {
                    info!("Registered cast device {} at {}", device.name, device.endpoint());
                    let session = (self.factory)(&device);
                    devices.insert(
                        device.id.clone(),
                        DeviceEntry {
                            descriptor: device.clone(),
                            session,
                        },
                    );
                    RegistryEvent::DeviceAdded(device)
                }
            }
        };

        let first_active = match &event {
            RegistryEvent::DeviceAdded(device) => {
                let mut active = write(&self.active);
                if active.is_none() {
                    *active = Some(device.id.clone());
                    Some(device.id.clone())
                } else {
                    None
                }
            }
            _ => None,
        };

        let _ = self.events.send(event);
        if let Some(id) = first_active {
            let _ = self.events.send(RegistryEvent::ActiveChanged(id));
        }
    }

    pub fn get(&self, id: &str) -> Option<DeviceEntry> {
        read(&self.devices).get(id).cloned()
    }

    /// All devices, sorted by name
    pub fn devices(&self) -> Vec<DeviceEntry> {
        let mut devices: Vec<DeviceEntry> = read(&self.devices).values().cloned().collect();
        devices.sort_by(|a, b| {
            a.descriptor
                .name
                .cmp(&b.descriptor.name)
                .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
        });
        devices
    }

    pub fn len(&self) -> usize {
        read(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct user actions to another known device. Returns false for an unknown id.
    pub fn set_active(&self, id: &str) -> bool {
        if !read(&self.devices).contains_key(id) {
            debug!("Cannot activate unknown device {}", id);
            return false;
        }
        let changed = {
            let mut active = write(&self.active);
            let changed = active.as_deref() != Some(id);
            *active = Some(id.to_string());
            changed
        };
        if changed {
            info!("Active device is now {}", id);
            let _ = self.events.send(RegistryEvent::ActiveChanged(id.to_string()));
        }
        true
    }

    pub fn active(&self) -> Option<DeviceEntry> {
        let id = read(&self.active).clone()?;
        self.get(&id)
    }

    fn active_session(&self, action: &str) -> Option<SessionHandle> {
        let session = self.active().map(|entry| entry.session);
        if session.is_none() {
            debug!("No active device for {}", action);
        }
        session
    }

    /// Stop every session and close its connection
    pub async fn shutdown(&self) {
        let sessions: Vec<SessionHandle> = read(&self.devices)
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        for session in sessions {
            session.shutdown().await;
        }
    }
}

#[async_trait]
impl DeviceControl for DeviceRegistry {
    async fn play_pause(&self) {
        if let Some(session) = self.active_session("play/pause") {
            session.play_pause().await;
        }
    }

    async fn volume_up(&self) {
        if let Some(session) = self.active_session("volume up") {
            session.volume_up().await;
        }
    }

    async fn volume_down(&self) {
        if let Some(session) = self.active_session("volume down") {
            session.volume_down().await;
        }
    }

    async fn volume_mute(&self) {
        if let Some(session) = self.active_session("mute") {
            session.volume_mute().await;
        }
    }

    async fn get_status(&self) {
        if let Some(session) = self.active_session("status") {
            session.get_status().await;
        }
    }
}
