//! The protobuf envelope carried inside every frame
//!
//! ```text
//! message CastMessage {
//!   required ProtocolVersion protocol_version = 1;  // CASTV2_1_0 = 0
//!   required string source_id = 2;
//!   required string destination_id = 3;
//!   required string namespace = 4;
//!   required PayloadType payload_type = 5;          // STRING = 0, BINARY = 1
//!   optional string payload_utf8 = 6;
//!   optional bytes payload_binary = 7;
//! }
//! ```
//!
//! Only varint and length-delimited fields occur, so the encoding is done by
//! hand instead of through a generated protobuf type.

use crate::errors::ProtocolError;
use bytes::{Buf, BufMut};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// CASTV2_1_0
pub const PROTOCOL_VERSION: u64 = 0;

/// How the envelope body is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadType {
    #[default]
    String,
    Binary,
}

impl PayloadType {
    fn wire_value(&self) -> u64 {
        match self {
            PayloadType::String => 0,
            PayloadType::Binary => 1,
        }
    }

    fn from_wire(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(PayloadType::String),
            1 => Ok(PayloadType::Binary),
            other => Err(ProtocolError::malformed(format!(
                "unknown payload type {}",
                other
            ))),
        }
    }
}

/// Decoded envelope fields
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CastEnvelope {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload_type: PayloadType,
    pub payload_utf8: Option<String>,
    pub payload_binary: Option<Vec<u8>>,
}

impl CastEnvelope {
    /// Envelope carrying a JSON text payload
    pub fn text(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload_type: PayloadType::String,
            payload_utf8: Some(payload.into()),
            payload_binary: None,
        }
    }

    /// Number of bytes [`CastEnvelope::encode`] will write
    pub fn encoded_len(&self) -> usize {
        let mut len = varint_field_len(1, PROTOCOL_VERSION)
            + bytes_field_len(2, self.source_id.len())
            + bytes_field_len(3, self.destination_id.len())
            + bytes_field_len(4, self.namespace.len())
            + varint_field_len(5, self.payload_type.wire_value());
        if let Some(text) = &self.payload_utf8 {
            len += bytes_field_len(6, text.len());
        }
        if let Some(binary) = &self.payload_binary {
            len += bytes_field_len(7, binary.len());
        }
        len
    }

    /// Write the envelope in field order
    pub fn encode<B: BufMut>(&self, out: &mut B) {
        put_varint_field(out, 1, PROTOCOL_VERSION);
        put_bytes_field(out, 2, self.source_id.as_bytes());
        put_bytes_field(out, 3, self.destination_id.as_bytes());
        put_bytes_field(out, 4, self.namespace.as_bytes());
        put_varint_field(out, 5, self.payload_type.wire_value());
        if let Some(text) = &self.payload_utf8 {
            put_bytes_field(out, 6, text.as_bytes());
        }
        if let Some(binary) = &self.payload_binary {
            put_bytes_field(out, 7, binary);
        }
    }

    /// Parse one complete envelope (no length prefix)
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut envelope = CastEnvelope::default();
        let mut saw_namespace = false;

        while buf.has_remaining() {
            let key = get_varint(&mut buf)?;
            let field = key >> 3;
            let wire_type = (key & 0x07) as u8;

            match wire_type {
                WIRE_VARINT => {
                    let value = get_varint(&mut buf)?;
                    match field {
                        1 if value != PROTOCOL_VERSION => {
                            return Err(ProtocolError::malformed(format!(
                                "unsupported protocol version {}",
                                value
                            )));
                        }
                        5 => envelope.payload_type = PayloadType::from_wire(value)?,
                        _ => {}
                    }
                }
                WIRE_LEN => {
                    let len = get_varint(&mut buf)? as usize;
                    if len > buf.remaining() {
                        return Err(ProtocolError::malformed(format!(
                            "field {} length {} runs past end of envelope",
                            field, len
                        )));
                    }
                    let value = &buf[..len];
                    match field {
                        2 => envelope.source_id = utf8(value)?,
                        3 => envelope.destination_id = utf8(value)?,
                        4 => {
                            envelope.namespace = utf8(value)?;
                            saw_namespace = true;
                        }
                        6 => envelope.payload_utf8 = Some(utf8(value)?),
                        7 => envelope.payload_binary = Some(value.to_vec()),
                        _ => {}
                    }
                    buf.advance(len);
                }
                WIRE_FIXED64 => skip(&mut buf, 8)?,
                WIRE_FIXED32 => skip(&mut buf, 4)?,
                other => {
                    return Err(ProtocolError::malformed(format!(
                        "unsupported wire type {} for field {}",
                        other, field
                    )));
                }
            }
        }

        if !saw_namespace {
            return Err(ProtocolError::malformed("envelope has no namespace"));
        }

        Ok(envelope)
    }
}

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn skip(buf: &mut &[u8], n: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::malformed("truncated fixed-width field"));
    }
    buf.advance(n);
    Ok(())
}

fn put_varint<B: BufMut>(out: &mut B, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

fn put_varint_field<B: BufMut>(out: &mut B, field: u64, value: u64) {
    put_varint(out, (field << 3) | WIRE_VARINT as u64);
    put_varint(out, value);
}

fn put_bytes_field<B: BufMut>(out: &mut B, field: u64, value: &[u8]) {
    put_varint(out, (field << 3) | WIRE_LEN as u64);
    put_varint(out, value.len() as u64);
    out.put_slice(value);
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, ProtocolError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    while shift < 64 {
        if !buf.has_remaining() {
            return Err(ProtocolError::malformed("truncated varint"));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(ProtocolError::malformed("varint longer than 10 bytes"))
}

fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn varint_field_len(field: u64, value: u64) -> usize {
    varint_len(field << 3) + varint_len(value)
}

fn bytes_field_len(field: u64, len: usize) -> usize {
    varint_len(field << 3) + varint_len(len as u64) + len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_encoded_len() {
        let envelope = CastEnvelope::text(
            "sender-0",
            "receiver-0",
            "urn:x-cast:com.google.cast.tp.connection",
            r#"{"type":"CONNECT"}"#,
        );
        let mut out = Vec::new();
        envelope.encode(&mut out);
        assert_eq!(out.len(), envelope.encoded_len());
    }

    #[test]
    fn test_known_wire_bytes() {
        let envelope = CastEnvelope::text("s", "r", "n", "{}");
        let mut out = Vec::new();
        envelope.encode(&mut out);
        assert_eq!(
            out,
            vec![
                0x08, 0x00, // protocol_version
                0x12, 0x01, b's', // source_id
                0x1a, 0x01, b'r', // destination_id
                0x22, 0x01, b'n', // namespace
                0x28, 0x00, // payload_type
                0x32, 0x02, b'{', b'}', // payload_utf8
            ]
        );
    }

    #[test]
    fn test_decode_skips_unknown_fields() {
        let envelope = CastEnvelope::text("s", "r", "n", "{}");
        let mut out = Vec::new();
        envelope.encode(&mut out);
        // field 9, varint 7
        out.extend_from_slice(&[0x48, 0x07]);
        // field 10, length-delimited "xy"
        out.extend_from_slice(&[0x52, 0x02, b'x', b'y']);

        let decoded = CastEnvelope::decode(&out).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_long_payload_uses_multi_byte_length() {
        let payload = "x".repeat(300);
        let envelope = CastEnvelope::text("sender-0", "receiver-0", "ns", payload.clone());
        let mut out = Vec::new();
        envelope.encode(&mut out);
        let decoded = CastEnvelope::decode(&out).unwrap();
        assert_eq!(decoded.payload_utf8.as_deref(), Some(payload.as_str()));
    }

    #[test]
    fn test_binary_payload() {
        let envelope = CastEnvelope {
            source_id: "a".into(),
            destination_id: "b".into(),
            namespace: "c".into(),
            payload_type: PayloadType::Binary,
            payload_utf8: None,
            payload_binary: Some(vec![0, 1, 2, 255]),
        };
        let mut out = Vec::new();
        envelope.encode(&mut out);
        assert_eq!(CastEnvelope::decode(&out).unwrap(), envelope);
    }

    #[test]
    fn test_truncated_field_is_malformed() {
        let envelope = CastEnvelope::text("sender-0", "receiver-0", "ns", "{}");
        let mut out = Vec::new();
        envelope.encode(&mut out);
        out.truncate(out.len() - 1);
        assert!(matches!(
            CastEnvelope::decode(&out),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_missing_namespace_is_malformed() {
        assert!(CastEnvelope::decode(&[0x08, 0x00]).is_err());
        assert!(CastEnvelope::decode(&[]).is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = [0x22, 0x02, 0xff, 0xfe];
        assert!(matches!(
            CastEnvelope::decode(&bytes),
            Err(ProtocolError::InvalidUtf8)
        ));
    }
}
