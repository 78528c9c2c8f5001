//! Turns arbitrarily chunked socket reads into whole decoded messages

use crate::codec::{decode_envelope, CastMessage};
use crate::protocol::{LENGTH_PREFIX_LEN, MAX_FRAME_LEN};
use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

/// Accumulates received bytes until complete frames are available.
///
/// Chunk boundaries carry no meaning: a chunk may hold several frames, part
/// of a length prefix, or a sliver of a payload.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_frame_len: usize,
    discarded_frames: u64,
    resyncs: u64,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(2048),
            max_frame_len,
            discarded_frames: 0,
            resyncs: 0,
        }
    }

    /// Append a chunk and return every message it completes, in order.
    ///
    /// A frame whose envelope fails to decode is dropped on its own. A length
    /// prefix above the frame limit cannot be trusted to find the next frame,
    /// so the whole buffer is dropped instead.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<CastMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while self.buffer.len() >= LENGTH_PREFIX_LEN {
            let declared = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;

            if declared > self.max_frame_len {
                warn!(
                    "Frame length {} exceeds limit {}, discarding {} buffered bytes",
                    declared,
                    self.max_frame_len,
                    self.buffer.len()
                );
                self.buffer.clear();
                self.resyncs += 1;
                break;
            }

            if self.buffer.len() < LENGTH_PREFIX_LEN + declared {
                trace!(
                    "Partial frame: have {} of {} bytes",
                    self.buffer.len() - LENGTH_PREFIX_LEN,
                    declared
                );
                break;
            }

            self.buffer.advance(LENGTH_PREFIX_LEN);
            let frame = self.buffer.split_to(declared);

            match decode_envelope(&frame) {
                Ok(message) => {
                    trace!(
                        "Decoded {} on {} from {}",
                        message.type_name(),
                        message.namespace,
                        message.source_id
                    );
                    messages.push(message);
                }
                Err(e) => {
                    warn!("Dropping malformed frame of {} bytes: {}", declared, e);
                    self.discarded_frames += 1;
                }
            }
        }

        messages
    }

    /// Bytes held waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames skipped because their envelope did not decode
    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    /// Times the buffer was dropped because of an untrustworthy prefix
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}
