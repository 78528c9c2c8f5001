use serde::{Deserialize, Serialize};
use std::fmt;

/// Default control port of a cast receiver
pub const DEFAULT_CAST_PORT: u16 = 8009;

/// Step applied by volume up/down when the receiver has not reported one
pub const DEFAULT_VOLUME_STEP: f64 = 0.05;

/// A receiver as reported by discovery
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique identifier, stable per physical receiver
    pub id: String,
    /// User-friendly name
    pub name: String,
    /// IP or hostname
    pub host: String,
    pub port: u16,
}

impl DeviceDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// `host:port` form used for logging and socket addressing
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// State of the control socket to one receiver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device session progress (bootstrap, then steady-state control)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    AwaitingAppLaunch,
    AwaitingAppConnect,
    AwaitingLoadAck,
    Ready,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAppLaunch => "awaiting_app_launch",
            SessionState::AwaitingAppConnect => "awaiting_app_connect",
            SessionState::AwaitingLoadAck => "awaiting_load_ack",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        }
    }

    /// True while CONNECT -> LAUNCH -> CONNECT(app) -> LOAD is still in progress
    pub fn is_bootstrapping(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::AwaitingAppLaunch
                | SessionState::AwaitingAppConnect
                | SessionState::AwaitingLoadAck
        )
    }

    /// States from which a user trigger starts a fresh bootstrap
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver volume as last reported (or last commanded)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// 0.0 to 1.0, kept at two decimals
    pub level: f64,
    pub muted: bool,
    pub step_interval: f64,
    pub control_type: String,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            level: 0.0,
            muted: false,
            step_interval: DEFAULT_VOLUME_STEP,
            control_type: "attenuation".to_string(),
        }
    }
}

impl Volume {
    /// Level one step up, rounded and clamped
    pub fn stepped_up(&self) -> f64 {
        normalize_level(self.level + self.step())
    }

    /// Level one step down, rounded and clamped
    pub fn stepped_down(&self) -> f64 {
        normalize_level(self.level - self.step())
    }

    pub fn set_level(&mut self, level: f64) {
        self.level = normalize_level(level);
    }

    fn step(&self) -> f64 {
        if self.step_interval > 0.0 {
            self.step_interval
        } else {
            DEFAULT_VOLUME_STEP
        }
    }
}

/// Round to two decimals and clamp to [0.0, 1.0].
///
/// Receivers report levels like 0.3 and steps like 0.05; plain float
/// accumulation would drift to 0.24999..., so every computed level goes
/// through here.
pub fn normalize_level(level: f64) -> f64 {
    if level.is_nan() {
        return 0.0;
    }
    ((level * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

/// The receiver application launched for playback
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverApplication {
    pub app_id: String,
    pub display_name: String,
    /// Destination id of the app's own channel
    pub transport_id: String,
    pub session_id: String,
}
