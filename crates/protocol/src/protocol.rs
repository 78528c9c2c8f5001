//! Protocol constants: namespaces, platform channel ids and frame limits

/// Connection management: CONNECT / CLOSE
pub const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";

/// Keep-alive: PING / PONG
pub const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";

/// Platform receiver: LAUNCH, GET_STATUS, SET_VOLUME, RECEIVER_STATUS
pub const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";

/// Media session: LOAD, MEDIA_STATUS
pub const NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// Sender side of the platform channel
pub const PLATFORM_SENDER_ID: &str = "sender-0";

/// Receiver side of the platform channel
pub const PLATFORM_RECEIVER_ID: &str = "receiver-0";

/// Default Media Receiver application
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

/// Size of the big-endian length prefix in front of every envelope
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest envelope a receiver will send or accept
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// TLS port receivers listen on for the control channel
pub const DEFAULT_CONTROL_PORT: u16 = 8009;
