//! HTTP endpoint receivers pull the live WAV stream from

use crate::publisher::AudioHub;
use crate::wav::wav_header;
use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const STREAM_PATH: &str = "/stream.wav";

#[derive(Clone)]
struct AppState {
    hub: AudioHub,
    shutdown: watch::Receiver<bool>,
}

/// Serves `/stream.wav` and `/status` until stopped or dropped
pub struct StreamServer {
    local_addr: SocketAddr,
    hub: AudioHub,
    shutdown: watch::Sender<bool>,
    server_handle: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Bind and start serving. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn start(bind: SocketAddr, hub: AudioHub) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to bind stream server to {}", bind))?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = AppState {
            hub: hub.clone(),
            shutdown: shutdown_rx,
        };

        let app = Router::new()
            .route(STREAM_PATH, get(stream_handler))
            .route("/status", get(status_handler))
            .with_state(state);

        info!("Stream server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Stream server error: {}", e);
            }
        });

        Ok(Self {
            local_addr,
            hub,
            shutdown,
            server_handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &AudioHub {
        &self.hub
    }

    /// URL a receiver at `device_ip` can reach this server on
    pub fn stream_url_for(&self, device_ip: IpAddr) -> Result<String> {
        stream_url(self.local_addr, device_ip)
    }

    /// Stop serving; open streams end after their current chunk
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.server_handle.take() {
            info!("Stopping stream server");
            handle.abort();
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

/// `http://<ip>:<port>/stream.wav` for a server bound to `local_addr`, as seen
/// from `device_ip`. An unspecified bind address resolves to the interface
/// that routes to the device.
pub fn stream_url(local_addr: SocketAddr, device_ip: IpAddr) -> Result<String> {
    let ip = if local_addr.ip().is_unspecified() {
        local_ip_for(device_ip)
            .with_context(|| format!("No local interface routes to {}", device_ip))?
    } else {
        local_addr.ip()
    };
    let authority = SocketAddr::new(ip, local_addr.port());
    Ok(format!("http://{}{}", authority, STREAM_PATH))
}

/// Local address the OS would use to reach `device_ip`.
/// Connecting a UDP socket sends nothing; it only resolves the route.
pub fn local_ip_for(device_ip: IpAddr) -> Option<IpAddr> {
    let bind: SocketAddr = match device_ip {
        IpAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
        IpAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect((device_ip, 1234)).ok()?;
    Some(socket.local_addr().ok()?.ip())
}

async fn stream_handler(State(state): State<AppState>) -> Response {
    info!("Client connected to stream");

    let wav = wav_header(state.hub.config());
    let mut listener = state.hub.subscribe();
    let mut shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        yield Ok::<Bytes, std::io::Error>(Bytes::from(wav));

        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                chunk = listener.next_chunk() => chunk,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            match next {
                Some(chunk) => yield Ok(chunk),
                None => break,
            }
        }

        debug!("Stream listener finished");
    };

    (
        [(header::CONTENT_TYPE, "audio/wav")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.hub.config();
    let stats = state.hub.stats();

    let status = serde_json::json!({
        "status": "streaming",
        "sample_rate": config.sample_rate,
        "channels": config.channels,
        "format": format!("{:?}", config.format),
        "buffer_ms": config.buffer_ms,
        "listeners": stats.listeners,
        "chunks_published": stats.chunks_published,
        "chunks_dropped": stats.chunks_dropped,
    });

    (StatusCode::OK, axum::Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamConfig;

    #[test]
    fn test_local_ip_for_loopback() {
        let ip = local_ip_for("127.0.0.1".parse().unwrap()).unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_stream_url_uses_bound_address() {
        let hub = AudioHub::new(StreamConfig::default());
        let server = StreamServer::start("127.0.0.1:0".parse().unwrap(), hub)
            .await
            .unwrap();
        let port = server.local_addr().port();
        assert_ne!(port, 0);

        let url = server
            .stream_url_for("192.168.1.40".parse().unwrap())
            .unwrap();
        assert_eq!(url, format!("http://127.0.0.1:{}/stream.wav", port));
    }

    #[tokio::test]
    async fn test_stream_url_resolves_unspecified_bind() {
        let hub = AudioHub::new(StreamConfig::default());
        let server = StreamServer::start("0.0.0.0:0".parse().unwrap(), hub)
            .await
            .unwrap();
        let port = server.local_addr().port();

        let url = server.stream_url_for("127.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(url, format!("http://127.0.0.1:{}/stream.wav", port));
    }
}
