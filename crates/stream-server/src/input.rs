//! PCM sources feeding the publisher
//!
//! Input is raw interleaved PCM already in the stream's format. Reads are
//! paced to real time so receivers see a live stream; when a source runs dry
//! the pump keeps the stream alive with silence.

use crate::publisher::AudioPublisher;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PcmSource {
    Silence,
    Stdin,
    File(PathBuf),
}

impl PcmSource {
    /// `-` means stdin; anything else is a file path
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            PcmSource::Stdin
        } else {
            PcmSource::File(PathBuf::from(arg))
        }
    }

    async fn open(&self) -> Result<Option<Box<dyn AsyncRead + Send + Unpin>>> {
        Ok(match self {
            PcmSource::Silence => None,
            PcmSource::Stdin => Some(Box::new(tokio::io::stdin())),
            PcmSource::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open PCM input {}", path.display()))?;
                Some(Box::new(file))
            }
        })
    }
}

/// Running input pump; dropping it stops the pump
pub struct InputPump {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl InputPump {
    /// Open `source` and start publishing one chunk per chunk interval
    pub async fn start(source: PcmSource, publisher: AudioPublisher) -> Result<Self> {
        let reader = source.open().await?;
        info!("Starting PCM input from {:?}", source);

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(pump(reader, publisher, stop_rx));
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub async fn stop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for InputPump {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn pump(
    mut reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    mut publisher: AudioPublisher,
    mut stop: watch::Receiver<bool>,
) {
    let config = publisher.hub().config().clone();
    let chunk_bytes = config.chunk_bytes();
    let silence = vec![0u8; chunk_bytes];
    let mut buf = vec![0u8; chunk_bytes];

    let mut ticker = interval(config.chunk_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        let Some(source) = reader.as_mut() else {
            publisher.publish(&silence);
            continue;
        };

        match read_chunk(source, &mut buf).await {
            Ok(0) => {
                info!("PCM input ended, continuing with silence");
                reader = None;
                publisher.publish(&silence);
            }
            Ok(n) => {
                // Short final read keeps the stream on whole chunks
                buf[n..].fill(0);
                publisher.publish(&buf);
            }
            Err(e) => {
                warn!("PCM input read failed, continuing with silence: {}", e);
                reader = None;
                publisher.publish(&silence);
            }
        }
    }

    debug!("PCM input pump stopped");
}

/// Fill `buf` unless the source ends first; returns bytes read
async fn read_chunk(
    source: &mut (dyn AsyncRead + Send + Unpin),
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::AudioHub;
    use crate::types::{SampleFormat, StreamConfig};
    use std::time::Duration;

    fn tiny() -> StreamConfig {
        // 8-byte chunks every 20 ms
        StreamConfig {
            sample_rate: 100,
            channels: 2,
            format: SampleFormat::S16LE,
            buffer_ms: 1000,
        }
    }

    #[test]
    fn test_source_from_arg() {
        assert_eq!(PcmSource::from_arg("-"), PcmSource::Stdin);
        assert_eq!(
            PcmSource::from_arg("/tmp/a.pcm"),
            PcmSource::File(PathBuf::from("/tmp/a.pcm"))
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let hub = AudioHub::new(tiny());
        let result = InputPump::start(
            PcmSource::File(PathBuf::from("/nonexistent/input.pcm")),
            hub.publisher(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_then_silence() {
        let path = std::env::temp_dir().join(format!("castaudio-input-{}.pcm", std::process::id()));
        tokio::fs::write(&path, [7u8; 12]).await.unwrap();

        let hub = AudioHub::new(tiny());
        let mut listener = hub.subscribe();
        let mut pump = InputPump::start(PcmSource::File(path.clone()), hub.publisher())
            .await
            .unwrap();

        let wait = Duration::from_secs(2);
        let first = tokio::time::timeout(wait, listener.next_chunk()).await.unwrap().unwrap();
        let second = tokio::time::timeout(wait, listener.next_chunk()).await.unwrap().unwrap();
        let third = tokio::time::timeout(wait, listener.next_chunk()).await.unwrap().unwrap();

        assert_eq!(&first[..], &[7; 8]);
        assert_eq!(&second[..], &[7, 7, 7, 7, 0, 0, 0, 0]);
        assert_eq!(&third[..], &[0; 8]);

        pump.stop().await;
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_silence_source_publishes() {
        let hub = AudioHub::new(tiny());
        let mut listener = hub.subscribe();
        let _pump = InputPump::start(PcmSource::Silence, hub.publisher())
            .await
            .unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(2), listener.next_chunk())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&chunk[..], &[0; 8]);
    }
}
