//! Fan-out of PCM chunks to HTTP listeners
//!
//! Every listener owns a bounded broadcast receiver. The producer never
//! waits: a listener that falls more than `buffer_ms` behind loses its oldest
//! chunks and carries on from the oldest one still held.

use crate::types::StreamConfig;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Default)]
struct Counters {
    listeners: AtomicUsize,
    chunks_published: AtomicU64,
    chunks_dropped: AtomicU64,
}

/// Counters reported by `/status`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub listeners: usize,
    pub chunks_published: u64,
    /// Chunks skipped by lagging listeners, summed over listeners
    pub chunks_dropped: u64,
}

struct HubInner {
    config: StreamConfig,
    sender: broadcast::Sender<Bytes>,
    counters: Counters,
}

/// Shared between the publisher and the HTTP handlers
#[derive(Clone)]
pub struct AudioHub {
    inner: Arc<HubInner>,
}

impl AudioHub {
    pub fn new(config: StreamConfig) -> Self {
        let (sender, _) = broadcast::channel(config.buffer_chunks());
        Self {
            inner: Arc::new(HubInner {
                config,
                sender,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Writer for the capture side; chunks it produces are whole sample frames
    pub fn publisher(&self) -> AudioPublisher {
        AudioPublisher {
            hub: self.clone(),
            pending: BytesMut::with_capacity(self.inner.config.chunk_bytes() * 2),
        }
    }

    /// Join the stream; the returned guard keeps the listener counted
    pub fn subscribe(&self) -> Listener {
        self.inner.counters.listeners.fetch_add(1, Ordering::SeqCst);
        Listener {
            hub: self.clone(),
            receiver: self.inner.sender.subscribe(),
        }
    }

    pub fn stats(&self) -> StreamStats {
        let counters = &self.inner.counters;
        StreamStats {
            listeners: counters.listeners.load(Ordering::SeqCst),
            chunks_published: counters.chunks_published.load(Ordering::Relaxed),
            chunks_dropped: counters.chunks_dropped.load(Ordering::Relaxed),
        }
    }

    fn send(&self, chunk: Bytes) {
        self.inner
            .counters
            .chunks_published
            .fetch_add(1, Ordering::Relaxed);
        // No listeners is not an error; the chunk is simply not heard
        let _ = self.inner.sender.send(chunk);
    }
}

/// Accepts PCM in any slice sizes and publishes fixed chunks
pub struct AudioPublisher {
    hub: AudioHub,
    pending: BytesMut,
}

impl AudioPublisher {
    /// Append interleaved PCM in the configured format
    pub fn publish(&mut self, pcm: &[u8]) {
        self.pending.extend_from_slice(pcm);
        let chunk_bytes = self.hub.config().chunk_bytes();
        while self.pending.len() >= chunk_bytes {
            let chunk = self.pending.split_to(chunk_bytes).freeze();
            self.hub.send(chunk);
        }
    }

    /// Bytes waiting to complete a chunk
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn hub(&self) -> &AudioHub {
        &self.hub
    }
}

/// One connected HTTP listener
pub struct Listener {
    hub: AudioHub,
    receiver: broadcast::Receiver<Bytes>,
}

impl Listener {
    /// Next chunk, skipping over anything dropped while lagging.
    /// Returns `None` once the hub is gone.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            match self.receiver.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!("Listener lagged, dropped {} oldest chunks", skipped);
                    self.hub
                        .inner
                        .counters
                        .chunks_dropped
                        .fetch_add(skipped, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.hub
            .inner
            .counters
            .listeners
            .fetch_sub(1, Ordering::SeqCst);
    }
}
