use thiserror::Error;

/// Failures while encoding or decoding control frames.
///
/// An unrecognised command `type` is not one of these: it decodes to
/// [`crate::Payload::Unknown`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope bytes are not a valid protobuf envelope
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Declared or encoded length exceeds the protocol limit
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The UTF-8 payload is not valid JSON, or does not match its `type`
    #[error("invalid payload json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not valid utf-8")]
    InvalidUtf8,
}

impl ProtocolError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedFrame(msg.into())
    }
}
