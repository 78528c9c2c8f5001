use crate::types::StreamConfig;

pub const WAV_HEADER_LEN: usize = 44;

/// Size written into RIFF and data chunk headers of an endless stream
const UNBOUNDED: u32 = 0xFFFF_FFFF;

/// Canonical 44-byte PCM WAV header for an endless stream
pub fn wav_header(cfg: &StreamConfig) -> Vec<u8> {
    let sample_rate = cfg.sample_rate;
    let channels = cfg.channels;
    let bits_per_sample = cfg.format.bit_depth();
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut header = Vec::with_capacity(WAV_HEADER_LEN);

    // RIFF header
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&UNBOUNDED.to_le_bytes());
    header.extend_from_slice(b"WAVE");

    // fmt chunk
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    header.extend_from_slice(b"data");
    header.extend_from_slice(&UNBOUNDED.to_le_bytes());

    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleFormat;

    fn u16_at(h: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([h[at], h[at + 1]])
    }

    fn u32_at(h: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([h[at], h[at + 1], h[at + 2], h[at + 3]])
    }

    #[test]
    fn test_wav_header_creation() {
        let header = wav_header(&StreamConfig::default());

        assert_eq!(header.len(), WAV_HEADER_LEN);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32_at(&header, 4), 0xFFFF_FFFF);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 48000);
        assert_eq!(u32_at(&header, 28), 192_000);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32_at(&header, 40), 0xFFFF_FFFF);
    }

    #[test]
    fn test_wav_header_24_bit_mono() {
        let header = wav_header(&StreamConfig {
            sample_rate: 44100,
            channels: 1,
            format: SampleFormat::S24LE,
            buffer_ms: 1000,
        });
        assert_eq!(u16_at(&header, 22), 1);
        assert_eq!(u32_at(&header, 28), 132_300);
        assert_eq!(u16_at(&header, 32), 3);
        assert_eq!(u16_at(&header, 34), 24);
    }
}
