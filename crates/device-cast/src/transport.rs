//! TLS control connection to a receiver
//!
//! One reader task turns socket chunks into messages through a
//! [`FrameReassembler`]; one writer task drains a queue so a single frame is
//! written at a time. While no connection is open, the most recent frame is
//! parked and flushed once the connection comes up.

use crate::connection::{CastConnection, TransportConfig, TransportEvent, RECEIVE_BUFFER_SIZE};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use cast_protocol::FrameReassembler;
use castaudio_core::ConnectionState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_native_tls::TlsStream;
use tracing::{debug, info, trace, warn};

type Stream = TlsStream<TcpStream>;

/// The single frame waiting for a connection; a newer frame replaces it
#[derive(Debug, Default)]
pub struct PendingSlot {
    frame: Option<Bytes>,
    replaced: u64,
}

impl PendingSlot {
    /// Park a frame, returning the one it displaced
    pub fn put(&mut self, frame: Bytes) -> Option<Bytes> {
        let displaced = self.frame.replace(frame);
        if displaced.is_some() {
            self.replaced += 1;
        }
        displaced
    }

    pub fn take(&mut self) -> Option<Bytes> {
        self.frame.take()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }

    /// Frames dropped because a newer one arrived first
    pub fn replaced(&self) -> u64 {
        self.replaced
    }
}

#[derive(Default)]
struct Link {
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    reader: Option<JoinHandle<()>>,
    /// Bumped whenever the link is torn down so late failures from old tasks are ignored
    generation: u64,
}

struct Shared {
    config: TransportConfig,
    endpoint: Mutex<(String, u16)>,
    state: Mutex<ConnectionState>,
    pending: Mutex<PendingSlot>,
    link: Mutex<Link>,
    /// Serializes connect and dispose
    lifecycle: tokio::sync::Mutex<()>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState, detail: Option<String>) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous == state && detail.is_none() {
            return;
        }
        debug!("Cast connection {} -> {}", previous, state);
        let _ = self.events.send(TransportEvent::StateChanged { state, detail });
    }

    async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state().is_connected() {
            return Ok(());
        }
        self.close_link();

        let (host, port) = lock(&self.endpoint).clone();
        self.set_state(ConnectionState::Connecting, None);
        info!("Connecting to cast receiver at {}:{}", host, port);

        let stream = match self.open(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to {}:{}: {}", host, port, e);
                self.set_state(ConnectionState::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        {
            let mut link = lock(&self.link);
            link.generation += 1;
            let generation = link.generation;
            link.reader = Some(tokio::spawn(read_loop(Arc::clone(self), reader, generation)));
            tokio::spawn(write_loop(Arc::clone(self), writer, frames_rx, generation));
            link.writer = Some(frames_tx.clone());
        }

        self.set_state(ConnectionState::Connected, None);
        info!("Connected to cast receiver at {}:{}", host, port);

        if let Some(frame) = lock(&self.pending).take() {
            debug!("Flushing pending {} byte frame", frame.len());
            let _ = frames_tx.send(frame);
        }
        Ok(())
    }

    async fn open(&self, host: &str, port: u16) -> Result<Stream, TransportError> {
        let handshake = async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(TransportError::Connect)?;
            tcp.set_nodelay(true).map_err(TransportError::Connect)?;
            socket2::SockRef::from(&tcp)
                .set_keepalive(true)
                .map_err(TransportError::Connect)?;

            let connector = self.config.trust.connector()?;
            let stream = connector.connect(host, tcp).await?;
            Ok::<_, TransportError>(stream)
        };

        tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                host: host.to_string(),
                port,
                timeout: self.config.connect_timeout,
            })?
    }

    fn send(self: &Arc<Self>, frame: Bytes) {
        let frame = match self.try_write(frame) {
            Ok(()) => return,
            Err(frame) => frame,
        };

        if let Some(old) = lock(&self.pending).put(frame) {
            debug!("Replaced pending {} byte frame", old.len());
        }

        match self.state() {
            ConnectionState::Connecting => {}
            ConnectionState::Connected => {
                // Connected between the write attempt and parking the frame
                if let Some(frame) = lock(&self.pending).take() {
                    if let Err(frame) = self.try_write(frame) {
                        lock(&self.pending).put(frame);
                    }
                }
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = shared.connect().await {
                        debug!("Connect for pending frame failed: {}", e);
                    }
                });
            }
        }
    }

    fn try_write(&self, frame: Bytes) -> Result<(), Bytes> {
        if !self.state().is_connected() {
            return Err(frame);
        }
        match lock(&self.link).writer.as_ref() {
            Some(writer) => writer.send(frame).map_err(|e| e.0),
            None => Err(frame),
        }
    }

    /// Drop the writer queue and stop the reader. Returns whether a link existed.
    fn close_link(&self) -> bool {
        let mut link = lock(&self.link);
        link.generation += 1;
        let had_writer = link.writer.take().is_some();
        let had_reader = match link.reader.take() {
            Some(reader) => {
                reader.abort();
                true
            }
            None => false,
        };
        had_writer || had_reader
    }

    fn fail(&self, generation: u64, error: TransportError) {
        {
            let mut link = lock(&self.link);
            if link.generation != generation {
                trace!("Ignoring failure from stale connection: {}", error);
                return;
            }
            link.generation += 1;
            link.writer = None;
            if let Some(reader) = link.reader.take() {
                reader.abort();
            }
        }
        warn!("Cast connection lost: {}", error);
        self.set_state(ConnectionState::Error, Some(error.to_string()));
    }

    async fn dispose(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.close_link() {
            debug!("Closed cast connection");
        }
        lock(&self.pending).take();
        self.set_state(ConnectionState::Disconnected, None);
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: ReadHalf<Stream>, generation: u64) {
    let mut reassembler = FrameReassembler::new();
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];

    let error = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break TransportError::ClosedByPeer,
            Ok(n) => {
                for message in reassembler.push(&buf[..n]) {
                    if shared.events.send(TransportEvent::Message(message)).is_err() {
                        debug!("Session gone, stopping receive loop");
                        return;
                    }
                }
            }
            Err(e) => break TransportError::Receive(e),
        }
    };

    shared.fail(generation, error);
}

async fn write_loop(
    shared: Arc<Shared>,
    mut writer: WriteHalf<Stream>,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    generation: u64,
) {
    while let Some(frame) = frames.recv().await {
        let written: std::io::Result<()> = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            shared.fail(generation, TransportError::Send(e));
            return;
        }
        trace!("Wrote {} byte frame", frame.len());
    }

    let _ = writer.shutdown().await;
}

/// [`CastConnection`] over TLS to a receiver's control port
#[derive(Clone)]
pub struct TlsTransport {
    shared: Arc<Shared>,
}

impl TlsTransport {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        config: TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                endpoint: Mutex::new((host.into(), port)),
                state: Mutex::new(ConnectionState::Disconnected),
                pending: Mutex::new(PendingSlot::default()),
                link: Mutex::new(Link::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    /// Build a transport together with the receiving end of its events
    pub fn channel(
        host: impl Into<String>,
        port: u16,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (Self::new(host, port, config, events_tx), events_rx)
    }

    pub fn endpoint(&self) -> (String, u16) {
        lock(&self.shared.endpoint).clone()
    }
}

#[async_trait]
impl CastConnection for TlsTransport {
    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn set_endpoint(&self, host: &str, port: u16) {
        *lock(&self.shared.endpoint) = (host.to_string(), port);
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.shared.connect().await
    }

    fn send(&self, frame: Bytes) {
        self.shared.send(frame)
    }

    async fn dispose(&self) {
        self.shared.dispose().await
    }
}
