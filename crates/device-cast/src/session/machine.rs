//! Session state machine without any I/O
//!
//! Every input returns the [`Action`]s to perform, in order. The session task
//! in [`super::handle`] executes them against a [`crate::CastConnection`].

use cast_protocol::{
    CastMessage, Command, MediaInformation, MediaStatusEntry, ReceiverStatus, VolumeRequest,
    DEFAULT_MEDIA_RECEIVER_APP_ID, NAMESPACE_CONNECTION, NAMESPACE_HEARTBEAT, NAMESPACE_MEDIA,
    NAMESPACE_RECEIVER, PLATFORM_RECEIVER_ID, PLATFORM_SENDER_ID,
};
use castaudio_core::{
    ConnectionState, DeviceDescriptor, ReceiverApplication, SessionState, Volume,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receiver application to launch
    pub app_id: String,
    /// Our end of every channel
    pub sender_id: String,
    /// What LOAD asks the application to play
    pub media: MediaInformation,
    /// How long to wait for the application to show up in RECEIVER_STATUS
    pub launch_timeout: Duration,
}

impl SessionConfig {
    pub fn new(media: MediaInformation) -> Self {
        Self {
            app_id: DEFAULT_MEDIA_RECEIVER_APP_ID.to_string(),
            sender_id: PLATFORM_SENDER_ID.to_string(),
            media,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }
}

/// Everything observable about one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub device: DeviceDescriptor,
    pub state: SessionState,
    pub connection: ConnectionState,
    pub volume: Volume,
    pub application: Option<ReceiverApplication>,
    /// `playerState` from the latest MEDIA_STATUS
    pub player_state: Option<String>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn new(device: DeviceDescriptor) -> Self {
        Self {
            device,
            state: SessionState::Idle,
            connection: ConnectionState::Disconnected,
            volume: Volume::default(),
            application: None,
            player_state: None,
            last_error: None,
        }
    }
}

/// Side effect requested by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open the connection and report the outcome through `connection_changed`
    Connect,
    Send(CastMessage),
    Dispose,
}

pub struct SessionMachine {
    config: SessionConfig,
    snapshot: SessionSnapshot,
    next_request_id: i64,
}

impl SessionMachine {
    pub fn new(device: DeviceDescriptor, config: SessionConfig) -> Self {
        Self {
            config,
            snapshot: SessionSnapshot::new(device),
            next_request_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.state
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_device(&mut self, device: DeviceDescriptor) {
        self.snapshot.device = device;
    }

    /// True while the launch timer should run
    pub fn awaiting_launch(&self) -> bool {
        matches!(
            self.state(),
            SessionState::AwaitingAppLaunch | SessionState::AwaitingAppConnect
        )
    }

    /// Start playback from Idle/Error, stop it from Ready
    pub fn play_pause(&mut self) -> Vec<Action> {
        match self.state() {
            state if state.can_start() => {
                info!("Starting playback on {}", self.snapshot.device.name);
                self.snapshot.application = None;
                self.snapshot.player_state = None;
                self.snapshot.last_error = None;
                self.transition(SessionState::Connecting);
                vec![Action::Connect]
            }
            SessionState::Ready => self.stop(),
            state => {
                debug!("Ignoring play/pause on {} while {}", self.snapshot.device.name, state);
                Vec::new()
            }
        }
    }

    pub fn volume_up(&mut self) -> Vec<Action> {
        if !self.can_control("volume up") {
            return Vec::new();
        }
        let level = self.snapshot.volume.stepped_up();
        self.send_level(level)
    }

    pub fn volume_down(&mut self) -> Vec<Action> {
        if !self.can_control("volume down") {
            return Vec::new();
        }
        let level = self.snapshot.volume.stepped_down();
        self.send_level(level)
    }

    pub fn volume_mute(&mut self) -> Vec<Action> {
        if !self.can_control("mute") {
            return Vec::new();
        }
        let muted = !self.snapshot.volume.muted;
        self.snapshot.volume.muted = muted;
        let request_id = self.request_id();
        vec![self.platform(
            NAMESPACE_RECEIVER,
            Command::SetVolume {
                volume: VolumeRequest::muted(muted),
                request_id,
            },
        )]
    }

    pub fn get_status(&mut self) -> Vec<Action> {
        if !self.can_control("status request") {
            return Vec::new();
        }
        let request_id = self.request_id();
        vec![self.platform(NAMESPACE_RECEIVER, Command::GetStatus { request_id })]
    }

    /// Feed a connection state change (or the outcome of [`Action::Connect`])
    pub fn connection_changed(
        &mut self,
        state: ConnectionState,
        detail: Option<String>,
    ) -> Vec<Action> {
        self.snapshot.connection = state;
        match state {
            ConnectionState::Connected if self.state() == SessionState::Connecting => {
                let connect = self.platform(NAMESPACE_CONNECTION, Command::Connect);
                let request_id = self.request_id();
                let launch = self.platform(
                    NAMESPACE_RECEIVER,
                    Command::Launch {
                        app_id: self.config.app_id.clone(),
                        request_id,
                    },
                );
                self.transition(SessionState::AwaitingAppLaunch);
                vec![connect, launch]
            }
            ConnectionState::Error if self.state() == SessionState::Error => {
                if detail.is_some() {
                    self.snapshot.last_error = detail;
                }
                Vec::new()
            }
            ConnectionState::Error => {
                self.fail(detail.unwrap_or_else(|| "connection error".to_string()));
                Vec::new()
            }
            ConnectionState::Disconnected
                if !matches!(self.state(), SessionState::Idle | SessionState::Error) =>
            {
                self.fail(detail.unwrap_or_else(|| "connection closed".to_string()));
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn message_received(&mut self, message: &CastMessage) -> Vec<Action> {
        let Some(command) = message.command() else {
            trace!(
                "Ignoring {} on {} from {}",
                message.type_name(),
                message.namespace,
                message.source_id
            );
            return Vec::new();
        };

        match command {
            Command::Ping => vec![Action::Send(CastMessage::new(
                self.config.sender_id.clone(),
                message.source_id.clone(),
                NAMESPACE_HEARTBEAT,
                Command::Pong,
            ))],
            Command::ReceiverStatus { status, .. } => self.receiver_status(status),
            Command::MediaStatus { status, .. } => {
                self.media_status(status);
                Vec::new()
            }
            Command::Close if message.namespace == NAMESPACE_CONNECTION => {
                self.remote_close(&message.source_id)
            }
            other => {
                trace!("Ignoring {} from {}", other.type_name(), message.source_id);
                Vec::new()
            }
        }
    }

    /// The application never appeared in RECEIVER_STATUS
    pub fn launch_timed_out(&mut self) -> Vec<Action> {
        if !self.awaiting_launch() {
            return Vec::new();
        }
        self.fail(format!(
            "{} did not start within {:?}",
            self.config.app_id, self.config.launch_timeout
        ));
        vec![Action::Dispose]
    }

    fn receiver_status(&mut self, status: &ReceiverStatus) -> Vec<Action> {
        if let Some(reported) = &status.volume {
            let volume = &mut self.snapshot.volume;
            if let Some(level) = reported.level {
                volume.set_level(level);
            }
            if let Some(muted) = reported.muted {
                volume.muted = muted;
            }
            if let Some(step) = reported.step_interval {
                volume.step_interval = step;
            }
            if let Some(control_type) = &reported.control_type {
                volume.control_type = control_type.clone();
            }
        }

        if !self.awaiting_launch() {
            return Vec::new();
        }

        let Some(app) = status.find_app(&self.config.app_id) else {
            debug!("{} not running yet, waiting for next status", self.config.app_id);
            return Vec::new();
        };

        info!(
            "{} running on {} (transport {})",
            app.display_name, self.snapshot.device.name, app.transport_id
        );
        self.snapshot.application = Some(ReceiverApplication {
            app_id: app.app_id.clone(),
            display_name: app.display_name.clone(),
            transport_id: app.transport_id.clone(),
            session_id: app.session_id.clone(),
        });
        self.transition(SessionState::AwaitingAppConnect);

        let mut actions = Vec::new();
        actions.extend(self.to_app(NAMESPACE_CONNECTION, Command::Connect));
        self.transition(SessionState::AwaitingLoadAck);

        let request_id = self.request_id();
        actions.extend(self.to_app(
            NAMESPACE_MEDIA,
            Command::Load {
                media: self.config.media.clone(),
                request_id,
            },
        ));
        self.transition(SessionState::Ready);
        actions
    }

    fn media_status(&mut self, status: &[MediaStatusEntry]) {
        if let Some(entry) = status.first() {
            debug!(
                "Media session {} is {}",
                entry.media_session_id, entry.player_state
            );
            self.snapshot.player_state = Some(entry.player_state.clone());
        }
    }

    /// The receiver closed a virtual connection
    fn remote_close(&mut self, source_id: &str) -> Vec<Action> {
        let closed_app = self
            .snapshot
            .application
            .as_ref()
            .is_some_and(|app| app.transport_id == source_id);
        if !closed_app {
            return Vec::new();
        }
        info!("Receiver closed application channel {}", source_id);
        self.snapshot.application = None;
        self.snapshot.player_state = None;
        let close = self.platform(NAMESPACE_CONNECTION, Command::Close);
        self.transition(SessionState::Idle);
        vec![close, Action::Dispose]
    }

    fn stop(&mut self) -> Vec<Action> {
        info!("Stopping playback on {}", self.snapshot.device.name);
        let mut actions = Vec::new();
        actions.extend(self.to_app(NAMESPACE_CONNECTION, Command::Close));
        actions.push(self.platform(NAMESPACE_CONNECTION, Command::Close));
        actions.push(Action::Dispose);
        self.snapshot.application = None;
        self.snapshot.player_state = None;
        self.transition(SessionState::Idle);
        actions
    }

    fn fail(&mut self, reason: String) {
        warn!("Session for {} failed: {}", self.snapshot.device.name, reason);
        self.snapshot.application = None;
        self.snapshot.player_state = None;
        self.snapshot.last_error = Some(reason);
        self.transition(SessionState::Error);
    }

    fn can_control(&self, what: &str) -> bool {
        let allowed =
            self.state() == SessionState::Ready && self.snapshot.connection.is_connected();
        if !allowed {
            debug!(
                "Dropping {} for {}: session {}, connection {}",
                what, self.snapshot.device.name, self.snapshot.state, self.snapshot.connection
            );
        }
        allowed
    }

    fn send_level(&mut self, level: f64) -> Vec<Action> {
        self.snapshot.volume.set_level(level);
        let request_id = self.request_id();
        vec![self.platform(
            NAMESPACE_RECEIVER,
            Command::SetVolume {
                volume: VolumeRequest::level(level),
                request_id,
            },
        )]
    }

    fn transition(&mut self, next: SessionState) {
        if self.snapshot.state != next {
            debug!(
                "Session {}: {} -> {}",
                self.snapshot.device.name, self.snapshot.state, next
            );
            self.snapshot.state = next;
        }
    }

    fn request_id(&mut self) -> i64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn platform(&self, namespace: &str, command: Command) -> Action {
        Action::Send(CastMessage::new(
            self.config.sender_id.clone(),
            PLATFORM_RECEIVER_ID,
            namespace,
            command,
        ))
    }

    fn to_app(&self, namespace: &str, command: Command) -> Option<Action> {
        let app = self.snapshot.application.as_ref()?;
        Some(Action::Send(CastMessage::new(
            self.config.sender_id.clone(),
            app.transport_id.clone(),
            namespace,
            command,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cast_protocol::{Application, Payload, StatusVolume};

    fn machine() -> SessionMachine {
        SessionMachine::new(
            DeviceDescriptor::new("dev-1", "Kitchen", "192.168.1.40", 8009),
            SessionConfig::new(MediaInformation::live(
                "http://192.168.1.20:8080/stream.wav",
                "audio/wav",
            )),
        )
    }

    fn sent(actions: &[Action]) -> Vec<(String, String, &'static str)> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Send(message) => Some((
                    message.destination_id.clone(),
                    message.namespace.clone(),
                    message.command().map(Command::type_name).unwrap_or("?"),
                )),
                _ => None,
            })
            .collect()
    }

    fn status(transport_id: &str, level: f64) -> CastMessage {
        CastMessage::new(
            PLATFORM_RECEIVER_ID,
            PLATFORM_SENDER_ID,
            NAMESPACE_RECEIVER,
            Command::ReceiverStatus {
                request_id: 0,
                status: ReceiverStatus {
                    applications: vec![Application {
                        app_id: DEFAULT_MEDIA_RECEIVER_APP_ID.into(),
                        display_name: "Default Media Receiver".into(),
                        transport_id: transport_id.into(),
                        session_id: "session-1".into(),
                    }],
                    volume: Some(StatusVolume {
                        control_type: Some("attenuation".into()),
                        level: Some(level),
                        muted: Some(false),
                        step_interval: Some(0.05),
                    }),
                },
            },
        )
    }

    fn ready_machine() -> SessionMachine {
        let mut m = machine();
        m.play_pause();
        m.connection_changed(ConnectionState::Connected, None);
        m.message_received(&status("web-7", 0.25));
        assert_eq!(m.state(), SessionState::Ready);
        m
    }

    #[test]
    fn test_bootstrap_sequence() {
        let mut m = machine();
        assert_eq!(m.play_pause(), vec![Action::Connect]);
        assert_eq!(m.state(), SessionState::Connecting);

        let actions = m.connection_changed(ConnectionState::Connected, None);
        assert_eq!(
            sent(&actions),
            vec![
                ("receiver-0".into(), NAMESPACE_CONNECTION.into(), "CONNECT"),
                ("receiver-0".into(), NAMESPACE_RECEIVER.into(), "LAUNCH"),
            ]
        );
        assert_eq!(m.state(), SessionState::AwaitingAppLaunch);
        assert!(m.awaiting_launch());

        let actions = m.message_received(&status("web-7", 0.4));
        assert_eq!(
            sent(&actions),
            vec![
                ("web-7".into(), NAMESPACE_CONNECTION.into(), "CONNECT"),
                ("web-7".into(), NAMESPACE_MEDIA.into(), "LOAD"),
            ]
        );
        assert_eq!(m.state(), SessionState::Ready);
        assert_eq!(m.snapshot().volume.level, 0.4);
        assert_eq!(
            m.snapshot().application.as_ref().map(|a| a.transport_id.as_str()),
            Some("web-7")
        );
    }

    #[test]
    fn test_request_ids_increase() {
        let mut m = machine();
        m.play_pause();
        let launch = m.connection_changed(ConnectionState::Connected, None);
        let load = m.message_received(&status("web-7", 0.4));
        let ids: Vec<i64> = launch
            .iter()
            .chain(load.iter())
            .filter_map(|a| match a {
                Action::Send(message) => message.request_id(),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_listed_app_without_transport_id_proceeds() {
        let mut m = machine();
        m.play_pause();
        m.connection_changed(ConnectionState::Connected, None);

        let actions = m.message_received(&status("", 0.25));
        assert_eq!(
            sent(&actions),
            vec![
                ("".into(), NAMESPACE_CONNECTION.into(), "CONNECT"),
                ("".into(), NAMESPACE_MEDIA.into(), "LOAD"),
            ]
        );
        assert_eq!(m.state(), SessionState::Ready);
    }

    #[test]
    fn test_app_not_listed_keeps_waiting() {
        let mut m = machine();
        m.play_pause();
        m.connection_changed(ConnectionState::Connected, None);

        let mut other = status("web-9", 0.4);
        if let Payload::Command(Command::ReceiverStatus { status, .. }) = &mut other.payload {
            status.applications[0].app_id = "E8C28D3C".into();
        }
        assert!(m.message_received(&other).is_empty());
        assert_eq!(m.state(), SessionState::AwaitingAppLaunch);

        let mut empty = status("web-9", 0.4);
        if let Payload::Command(Command::ReceiverStatus { status, .. }) = &mut empty.payload {
            status.applications.clear();
        }
        assert!(m.message_received(&empty).is_empty());
        assert_eq!(m.state(), SessionState::AwaitingAppLaunch);
        assert_eq!(m.snapshot().volume.level, 0.4);
    }

    #[test]
    fn test_volume_dropped_unless_ready_and_connected() {
        let mut m = machine();
        assert!(m.volume_up().is_empty());
        assert!(m.volume_down().is_empty());
        assert!(m.volume_mute().is_empty());
        assert!(m.get_status().is_empty());

        m.play_pause();
        m.connection_changed(ConnectionState::Connected, None);
        // Mid-bootstrap
        assert!(m.volume_up().is_empty());
        assert!(m.get_status().is_empty());

        let mut m = ready_machine();
        m.connection_changed(ConnectionState::Error, Some("reset".into()));
        assert!(m.volume_up().is_empty());
        assert!(m.volume_mute().is_empty());
    }

    #[test]
    fn test_volume_commands_when_ready() {
        let mut m = ready_machine();

        let up = m.volume_up();
        match &up[..] {
            [Action::Send(message)] => match message.command() {
                Some(Command::SetVolume { volume, .. }) => assert_eq!(volume.level, Some(0.3)),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        let down = m.volume_down();
        assert!(matches!(
            &down[..],
            [Action::Send(message)] if matches!(
                message.command(),
                Some(Command::SetVolume { volume, .. }) if volume.level == Some(0.25)
            )
        ));

        let mute = m.volume_mute();
        assert!(matches!(
            &mute[..],
            [Action::Send(message)] if matches!(
                message.command(),
                Some(Command::SetVolume { volume, .. }) if volume.muted == Some(true) && volume.level.is_none()
            )
        ));
        assert!(m.snapshot().volume.muted);

        let status = m.get_status();
        assert_eq!(
            sent(&status),
            vec![("receiver-0".into(), NAMESPACE_RECEIVER.into(), "GET_STATUS")]
        );
    }

    #[test]
    fn test_volume_clamps_at_bounds() {
        let mut m = ready_machine();
        m.message_received(&status("web-7", 1.0));
        m.volume_up();
        assert_eq!(m.snapshot().volume.level, 1.0);

        m.message_received(&status("web-7", 0.0));
        m.volume_down();
        assert_eq!(m.snapshot().volume.level, 0.0);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let mut m = machine();
        let ping = CastMessage::new(PLATFORM_RECEIVER_ID, PLATFORM_SENDER_ID, NAMESPACE_HEARTBEAT, Command::Ping);
        let actions = m.message_received(&ping);
        assert_eq!(
            sent(&actions),
            vec![("receiver-0".into(), NAMESPACE_HEARTBEAT.into(), "PONG")]
        );
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_unknown_type_changes_nothing() {
        let mut m = ready_machine();
        let before = m.snapshot().clone();
        let unknown = CastMessage {
            source_id: PLATFORM_RECEIVER_ID.into(),
            destination_id: PLATFORM_SENDER_ID.into(),
            namespace: "urn:x-cast:com.google.cast.multizone".into(),
            payload: Payload::Unknown {
                kind: "DEVICE_UPDATED".into(),
                raw: r#"{"type":"DEVICE_UPDATED"}"#.into(),
            },
        };
        assert!(m.message_received(&unknown).is_empty());
        assert_eq!(m.snapshot(), &before);
    }

    #[test]
    fn test_transport_error_clears_application() {
        let mut m = ready_machine();
        m.connection_changed(ConnectionState::Error, Some("connection reset".into()));
        assert_eq!(m.state(), SessionState::Error);
        assert!(m.snapshot().application.is_none());
        assert_eq!(m.snapshot().last_error.as_deref(), Some("connection reset"));

        // Next trigger starts over
        assert_eq!(m.play_pause(), vec![Action::Connect]);
        assert_eq!(m.state(), SessionState::Connecting);
        assert!(m.snapshot().last_error.is_none());
    }

    #[test]
    fn test_play_pause_on_ready_stops() {
        let mut m = ready_machine();
        let actions = m.play_pause();
        assert_eq!(
            sent(&actions),
            vec![
                ("web-7".into(), NAMESPACE_CONNECTION.into(), "CLOSE"),
                ("receiver-0".into(), NAMESPACE_CONNECTION.into(), "CLOSE"),
            ]
        );
        assert_eq!(actions.last(), Some(&Action::Dispose));
        assert_eq!(m.state(), SessionState::Idle);

        // The resulting disconnect is expected
        m.connection_changed(ConnectionState::Disconnected, None);
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_play_pause_ignored_mid_bootstrap() {
        let mut m = machine();
        m.play_pause();
        assert!(m.play_pause().is_empty());
        assert_eq!(m.state(), SessionState::Connecting);
    }

    #[test]
    fn test_launch_timeout() {
        let mut m = machine();
        m.play_pause();
        m.connection_changed(ConnectionState::Connected, None);
        assert_eq!(m.launch_timed_out(), vec![Action::Dispose]);
        assert_eq!(m.state(), SessionState::Error);

        // Outside the launch wait it does nothing
        let mut m = ready_machine();
        assert!(m.launch_timed_out().is_empty());
        assert_eq!(m.state(), SessionState::Ready);
    }

    #[test]
    fn test_media_status_records_player_state() {
        let mut m = ready_machine();
        let media = CastMessage::new(
            "web-7",
            PLATFORM_SENDER_ID,
            NAMESPACE_MEDIA,
            Command::MediaStatus {
                request_id: 2,
                status: vec![MediaStatusEntry {
                    media_session_id: 1,
                    player_state: "PLAYING".into(),
                    idle_reason: None,
                }],
            },
        );
        assert!(m.message_received(&media).is_empty());
        assert_eq!(m.snapshot().player_state.as_deref(), Some("PLAYING"));
        assert_eq!(m.state(), SessionState::Ready);

        // Player state alone never moves the bootstrap along
        let mut m = machine();
        m.play_pause();
        m.connection_changed(ConnectionState::Connected, None);
        assert!(m.message_received(&media).is_empty());
        assert_eq!(m.state(), SessionState::AwaitingAppLaunch);
        assert_eq!(m.snapshot().player_state.as_deref(), Some("PLAYING"));
    }

    #[test]
    fn test_receiver_closing_app_channel_returns_to_idle() {
        let mut m = ready_machine();
        let close = CastMessage::new("web-7", PLATFORM_SENDER_ID, NAMESPACE_CONNECTION, Command::Close);
        let actions = m.message_received(&close);
        assert_eq!(actions.last(), Some(&Action::Dispose));
        assert_eq!(m.state(), SessionState::Idle);

        // A CLOSE from an unrelated channel is ignored
        let mut m = ready_machine();
        let close = CastMessage::new("web-99", PLATFORM_SENDER_ID, NAMESPACE_CONNECTION, Command::Close);
        assert!(m.message_received(&close).is_empty());
        assert_eq!(m.state(), SessionState::Ready);
    }
}
