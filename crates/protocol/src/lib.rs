//! Cast control protocol (CASTV2) framing and messages
//!
//! A control connection carries length-prefixed protobuf envelopes. Each
//! envelope addresses a channel (`source_id`, `destination_id`, `namespace`)
//! and wraps a JSON command such as `CONNECT`, `LAUNCH` or `SET_VOLUME`.
//!
//! # Layers
//!
//! - [`envelope`]: the protobuf envelope, encoded and decoded by hand
//! - [`payload`]: typed JSON commands keyed by their `type` field
//! - [`codec`]: envelope + payload <-> one length-prefixed frame
//! - [`reassembler`]: arbitrary socket chunks -> whole decoded messages

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod payload;
pub mod protocol;
pub mod reassembler;

pub use codec::{decode_envelope, encode_frame, CastMessage};
pub use envelope::{CastEnvelope, PayloadType};
pub use errors::ProtocolError;
pub use payload::{
    Application, Command, MediaInformation, MediaStatusEntry, Payload, ReceiverStatus,
    StatusVolume, VolumeRequest,
};
pub use protocol::*;
pub use reassembler::FrameReassembler;
