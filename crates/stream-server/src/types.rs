use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Length of one published chunk
pub const CHUNK_MS: u32 = 20;

/// PCM sample encoding served in the WAV stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 16-bit signed integer (little-endian)
    #[default]
    S16LE,
    /// 24-bit signed integer (little-endian, packed)
    S24LE,
}

impl SampleFormat {
    /// Get the size in bytes per sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S24LE => 3,
            SampleFormat::S16LE => 2,
        }
    }

    /// Get the bit depth
    pub fn bit_depth(&self) -> u16 {
        match self {
            SampleFormat::S24LE => 24,
            SampleFormat::S16LE => 16,
        }
    }
}

/// Shape of the PCM stream handed to receivers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (typically 2)
    pub channels: u16,
    pub format: SampleFormat,
    /// Audio a slow listener may fall behind by before the oldest is dropped
    pub buffer_ms: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S16LE,
            buffer_ms: 1000,
        }
    }
}

impl StreamConfig {
    /// Bytes in one sample frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.frame_bytes() as u32
    }

    /// Frames in one published chunk, at least one
    pub fn chunk_frames(&self) -> usize {
        ((self.sample_rate as u64 * CHUNK_MS as u64 / 1000) as usize).max(1)
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_frames() * self.frame_bytes()
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_nanos(self.chunk_frames() as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Chunks each listener may hold before the oldest is dropped
    pub fn buffer_chunks(&self) -> usize {
        (self.buffer_ms / CHUNK_MS).max(1) as usize
    }

    /// Calculate buffer size in bytes
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_chunks() * self.chunk_bytes()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("sample_rate must be positive");
        }
        if self.channels == 0 {
            anyhow::bail!("channels must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::S24LE.bytes_per_sample(), 3);
        assert_eq!(SampleFormat::S16LE.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::S24LE.bit_depth(), 24);
    }

    #[test]
    fn test_chunking_follows_config() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.frame_bytes(), 4);
        assert_eq!(cfg.byte_rate(), 192_000);
        assert_eq!(cfg.chunk_frames(), 960);
        assert_eq!(cfg.chunk_bytes(), 3840);
        assert_eq!(cfg.buffer_chunks(), 50);
        assert_eq!(cfg.chunk_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_buffer_calculation_24_bit() {
        let cfg = StreamConfig {
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::S24LE,
            buffer_ms: 100,
        };
        assert_eq!(cfg.buffer_chunks(), 5);
        assert_eq!(cfg.buffer_bytes(), 28800); // 4800 frames * 2 * 3
    }

    #[test]
    fn test_tiny_buffer_keeps_one_chunk() {
        let cfg = StreamConfig {
            buffer_ms: 5,
            ..StreamConfig::default()
        };
        assert_eq!(cfg.buffer_chunks(), 1);
    }

    #[test]
    fn test_config_deserializes_partial() {
        let cfg: StreamConfig =
            serde_json::from_str(r#"{"format":"S24LE","sample_rate":44100}"#).unwrap();
        assert_eq!(cfg.format, SampleFormat::S24LE);
        assert_eq!(cfg.sample_rate, 44100);
        assert_eq!(cfg.channels, 2);
        assert!(cfg.validate().is_ok());

        let bad = StreamConfig {
            channels: 0,
            ..StreamConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
