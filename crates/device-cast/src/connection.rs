use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use cast_protocol::CastMessage;
use castaudio_core::ConnectionState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time allowed for TCP connect plus TLS handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket read size for the receive loop
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Raised by a connection towards the session that owns it
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection state moved; `detail` carries the error text for `Error`
    StateChanged {
        state: ConnectionState,
        detail: Option<String>,
    },
    /// A whole message came off the wire
    Message(CastMessage),
}

/// Control connection to a single receiver.
///
/// Implementations report progress through the [`TransportEvent`] channel
/// they were built with. `send` never blocks: it hands the frame to the
/// writer, or parks it while a connection is being opened.
#[async_trait]
pub trait CastConnection: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Point future connects at a new address. An open connection is kept.
    fn set_endpoint(&self, host: &str, port: u16);

    /// Open the connection. Returns once it is usable or has failed.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Queue one encoded frame.
    ///
    /// While not connected, only the most recent frame is kept and a connect
    /// is started.
    fn send(&self, frame: Bytes);

    /// Close the socket and stop the reader. Safe to call repeatedly.
    async fn dispose(&self);
}

/// Certificate policy for the receiver's TLS endpoint.
///
/// Receivers present self-signed certificates, so the default accepts any
/// certificate and host name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicy {
    #[default]
    AcceptAny,
    SystemRoots,
}

impl TrustPolicy {
    pub fn connector(&self) -> Result<tokio_native_tls::TlsConnector, TransportError> {
        let mut builder = native_tls::TlsConnector::builder();
        builder.min_protocol_version(Some(native_tls::Protocol::Tlsv12));
        if let TrustPolicy::AcceptAny = self {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let connector = builder.build()?;
        Ok(tokio_native_tls::TlsConnector::from(connector))
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub trust: TrustPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            trust: TrustPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            trust: TrustPolicy,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"trust":"system_roots"}"#).unwrap();
        assert_eq!(parsed.trust, TrustPolicy::SystemRoots);
        assert_eq!(TrustPolicy::default(), TrustPolicy::AcceptAny);
    }

    #[test]
    fn test_connectors_build() {
        assert!(TrustPolicy::AcceptAny.connector().is_ok());
        assert!(TrustPolicy::SystemRoots.connector().is_ok());
    }
}
