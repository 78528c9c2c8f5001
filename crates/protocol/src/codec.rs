//! Typed message <-> length-prefixed wire frame

use crate::envelope::{CastEnvelope, PayloadType};
use crate::errors::ProtocolError;
use crate::payload::{Command, Payload};
use crate::protocol::{LENGTH_PREFIX_LEN, MAX_FRAME_LEN};
use bytes::{BufMut, Bytes, BytesMut};

/// One addressed message on a control connection
#[derive(Debug, Clone, PartialEq)]
pub struct CastMessage {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload: Payload,
}

impl CastMessage {
    pub fn new(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        command: Command,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload: Payload::Command(command),
        }
    }

    pub fn command(&self) -> Option<&Command> {
        self.payload.command()
    }

    pub fn type_name(&self) -> &str {
        self.payload.type_name()
    }

    pub fn request_id(&self) -> Option<i64> {
        self.command().and_then(Command::request_id)
    }

    fn to_envelope(&self) -> Result<CastEnvelope, ProtocolError> {
        let (payload_type, payload_utf8, payload_binary) = match &self.payload {
            Payload::Binary(data) => (PayloadType::Binary, None, Some(data.clone())),
            other => (PayloadType::String, other.to_json()?, None),
        };
        Ok(CastEnvelope {
            source_id: self.source_id.clone(),
            destination_id: self.destination_id.clone(),
            namespace: self.namespace.clone(),
            payload_type,
            payload_utf8,
            payload_binary,
        })
    }

    fn from_envelope(envelope: CastEnvelope) -> Result<Self, ProtocolError> {
        let payload = match envelope.payload_type {
            PayloadType::String => {
                let text = envelope
                    .payload_utf8
                    .ok_or_else(|| ProtocolError::malformed("string envelope without payload_utf8"))?;
                Payload::from_json(&text)?
            }
            PayloadType::Binary => Payload::Binary(envelope.payload_binary.unwrap_or_default()),
        };
        Ok(Self {
            source_id: envelope.source_id,
            destination_id: envelope.destination_id,
            namespace: envelope.namespace,
            payload,
        })
    }
}

/// Encode a message as `u32` big-endian envelope length + envelope bytes
pub fn encode_frame(message: &CastMessage) -> Result<Bytes, ProtocolError> {
    let envelope = message.to_envelope()?;
    let len = envelope.encoded_len();
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + len);
    frame.put_u32(len as u32);
    envelope.encode(&mut frame);
    Ok(frame.freeze())
}

/// Decode one complete envelope (the bytes after the length prefix)
pub fn decode_envelope(bytes: &[u8]) -> Result<CastMessage, ProtocolError> {
    let envelope = CastEnvelope::decode(bytes)?;
    CastMessage::from_envelope(envelope)
}
