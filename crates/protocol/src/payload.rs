//! JSON command payloads keyed by their `type` field

use crate::errors::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands and events understood by this client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Open a virtual connection to a channel
    Connect,

    /// Close a virtual connection
    Close,

    Ping,

    Pong,

    #[serde(rename_all = "camelCase")]
    Launch { app_id: String, request_id: i64 },

    #[serde(rename_all = "camelCase")]
    Load {
        media: MediaInformation,
        request_id: i64,
    },

    #[serde(rename_all = "camelCase")]
    SetVolume {
        volume: VolumeRequest,
        request_id: i64,
    },

    #[serde(rename_all = "camelCase")]
    GetStatus { request_id: i64 },

    /// Receiver-pushed platform status (apps + volume)
    #[serde(rename_all = "camelCase")]
    ReceiverStatus {
        #[serde(default)]
        request_id: i64,
        status: ReceiverStatus,
    },

    /// Receiver-pushed media session status
    #[serde(rename_all = "camelCase")]
    MediaStatus {
        #[serde(default)]
        request_id: i64,
        #[serde(default)]
        status: Vec<MediaStatusEntry>,
    },
}

impl Command {
    /// Wire names of every variant, in declaration order
    pub const TYPES: &'static [&'static str] = &[
        "CONNECT",
        "CLOSE",
        "PING",
        "PONG",
        "LAUNCH",
        "LOAD",
        "SET_VOLUME",
        "GET_STATUS",
        "RECEIVER_STATUS",
        "MEDIA_STATUS",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Close => "CLOSE",
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::Launch { .. } => "LAUNCH",
            Command::Load { .. } => "LOAD",
            Command::SetVolume { .. } => "SET_VOLUME",
            Command::GetStatus { .. } => "GET_STATUS",
            Command::ReceiverStatus { .. } => "RECEIVER_STATUS",
            Command::MediaStatus { .. } => "MEDIA_STATUS",
        }
    }

    pub fn request_id(&self) -> Option<i64> {
        match self {
            Command::Launch { request_id, .. }
            | Command::Load { request_id, .. }
            | Command::SetVolume { request_id, .. }
            | Command::GetStatus { request_id }
            | Command::ReceiverStatus { request_id, .. }
            | Command::MediaStatus { request_id, .. } => Some(*request_id),
            Command::Connect | Command::Close | Command::Ping | Command::Pong => None,
        }
    }

    pub fn is_known_type(name: &str) -> bool {
        Self::TYPES.contains(&name)
    }
}

/// Media descriptor sent with LOAD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInformation {
    /// URL the receiver pulls from
    pub content_id: String,
    pub content_type: String,
    /// `LIVE` for an unbounded capture stream
    pub stream_type: String,
}

impl MediaInformation {
    pub fn live(content_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
            stream_type: "LIVE".to_string(),
        }
    }
}

/// SET_VOLUME body: either a level or a mute flag
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

impl VolumeRequest {
    pub fn level(level: f64) -> Self {
        Self {
            level: Some(level),
            muted: None,
        }
    }

    pub fn muted(muted: bool) -> Self {
        Self {
            level: None,
            muted: Some(muted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<Application>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<StatusVolume>,
}

impl ReceiverStatus {
    pub fn find_app(&self, app_id: &str) -> Option<&Application> {
        self.applications.iter().find(|app| app.app_id == app_id)
    }
}

/// A running receiver application
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub app_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub transport_id: String,
    #[serde(default)]
    pub session_id: String,
}

/// Volume as reported inside RECEIVER_STATUS
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusVolume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_interval: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatusEntry {
    pub media_session_id: i64,
    #[serde(default)]
    pub player_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_reason: Option<String>,
}

/// Body of one envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Command(Command),
    /// A `type` this client does not model; kept verbatim
    Unknown { kind: String, raw: String },
    Binary(Vec<u8>),
}

impl Payload {
    /// Parse a `payload_utf8` string.
    ///
    /// Unrecognised or missing `type` values are not errors; newer receiver
    /// firmware adds message types freely.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if Command::is_known_type(&kind) {
            let command: Command = serde_json::from_value(value)?;
            Ok(Payload::Command(command))
        } else {
            Ok(Payload::Unknown {
                kind,
                raw: text.to_string(),
            })
        }
    }

    /// Text to place in `payload_utf8`, `None` for binary payloads
    pub fn to_json(&self) -> Result<Option<String>, ProtocolError> {
        match self {
            Payload::Command(command) => Ok(Some(serde_json::to_string(command)?)),
            Payload::Unknown { raw, .. } => Ok(Some(raw.clone())),
            Payload::Binary(_) => Ok(None),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Payload::Command(command) => command.type_name(),
            Payload::Unknown { kind, .. } => kind,
            Payload::Binary(_) => "BINARY",
        }
    }

    pub fn command(&self) -> Option<&Command> {
        match self {
            Payload::Command(command) => Some(command),
            _ => None,
        }
    }
}

impl From<Command> for Payload {
    fn from(command: Command) -> Self {
        Payload::Command(command)
    }
}
