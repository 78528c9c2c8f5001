//! Cast receiver control: TLS transport, per-device sessions, registry and
//! mDNS discovery.

pub mod connection;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;

pub use connection::{CastConnection, TransportConfig, TransportEvent, TrustPolicy};
pub use discovery::{discover_devices, watch_devices, DiscoveryHandle};
pub use error::TransportError;
pub use registry::{DeviceEntry, DeviceRegistry, RegistryEvent, SessionFactory};
pub use session::{SessionConfig, SessionHandle, SessionMachine, SessionSnapshot};
pub use transport::TlsTransport;
