use super::machine::{Action, SessionConfig, SessionMachine, SessionSnapshot};
use crate::connection::{CastConnection, TransportEvent};
use async_trait::async_trait;
use cast_protocol::encode_frame;
use castaudio_core::{DeviceControl, DeviceDescriptor};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug)]
enum SessionCommand {
    PlayPause,
    VolumeUp,
    VolumeDown,
    VolumeMute,
    GetStatus,
    UpdateDevice(DeviceDescriptor),
    Shutdown,
}

struct Request {
    command: SessionCommand,
    done: Option<oneshot::Sender<()>>,
}

/// Cheap handle to a running session task.
///
/// Commands are applied in the order they are issued. The awaited methods
/// return once the command has been applied and its frames queued.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Request>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Start the session task for one device
    pub fn spawn(
        device: DeviceDescriptor,
        config: SessionConfig,
        connection: Arc<dyn CastConnection>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let machine = SessionMachine::new(device, config);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot().clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            machine,
            connection,
            events,
            commands: commands_rx,
            snapshot: snapshot_tx,
            launch_deadline: None,
        };
        tokio::spawn(task.run());

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Re-point the session at a changed address without resetting it
    pub fn update_device(&self, device: DeviceDescriptor) {
        let _ = self.commands.send(Request {
            command: SessionCommand::UpdateDevice(device),
            done: None,
        });
    }

    /// Stop the task and close the connection
    pub async fn shutdown(&self) {
        self.request(SessionCommand::Shutdown).await
    }

    async fn request(&self, command: SessionCommand) {
        let (done_tx, done_rx) = oneshot::channel();
        let request = Request {
            command,
            done: Some(done_tx),
        };
        if let Err(e) = self.commands.send(request) {
            debug!("Session task gone, dropping {:?}", e.0.command);
            return;
        }
        let _ = done_rx.await;
    }
}

#[async_trait]
impl DeviceControl for SessionHandle {
    async fn play_pause(&self) {
        self.request(SessionCommand::PlayPause).await
    }

    async fn volume_up(&self) {
        self.request(SessionCommand::VolumeUp).await
    }

    async fn volume_down(&self) {
        self.request(SessionCommand::VolumeDown).await
    }

    async fn volume_mute(&self) {
        self.request(SessionCommand::VolumeMute).await
    }

    async fn get_status(&self) {
        self.request(SessionCommand::GetStatus).await
    }
}

struct SessionTask {
    machine: SessionMachine,
    connection: Arc<dyn CastConnection>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Request>,
    snapshot: watch::Sender<SessionSnapshot>,
    launch_deadline: Option<Instant>,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            let deadline = self.launch_deadline;
            tokio::select! {
                // Transport events first, so a command never acts on stale connection state
                biased;

                Some(event) = self.events.recv() => self.on_event(event).await,

                request = self.commands.recv() => {
                    let Some(request) = request else { break };
                    let shutdown = matches!(request.command, SessionCommand::Shutdown);
                    if !shutdown {
                        self.on_command(request.command).await;
                    }
                    self.publish();
                    if let Some(done) = request.done {
                        let _ = done.send(());
                    }
                    if shutdown {
                        break;
                    }
                    continue;
                }

                _ = launch_timer(deadline) => {
                    self.launch_deadline = None;
                    let actions = self.machine.launch_timed_out();
                    self.execute(actions).await;
                }
            }
            self.publish();
        }

        debug!("Session for {} shutting down", self.machine.snapshot().device.name);
        self.connection.dispose().await;
    }

    async fn on_event(&mut self, event: TransportEvent) {
        let actions = match event {
            TransportEvent::StateChanged { state, detail } => {
                // Events can trail the connect result already applied
                if state != self.connection.state() {
                    trace!("Skipping stale connection event ({})", state);
                    return;
                }
                self.machine.connection_changed(state, detail)
            }
            TransportEvent::Message(message) => self.machine.message_received(&message),
        };
        self.execute(actions).await;
    }

    async fn on_command(&mut self, command: SessionCommand) {
        let actions = match command {
            SessionCommand::PlayPause => self.machine.play_pause(),
            SessionCommand::VolumeUp => self.machine.volume_up(),
            SessionCommand::VolumeDown => self.machine.volume_down(),
            SessionCommand::VolumeMute => self.machine.volume_mute(),
            SessionCommand::GetStatus => self.machine.get_status(),
            SessionCommand::UpdateDevice(device) => {
                self.connection.set_endpoint(&device.host, device.port);
                self.machine.set_device(device);
                Vec::new()
            }
            SessionCommand::Shutdown => Vec::new(),
        };
        self.execute(actions).await;
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Connect => {
                    let detail = self.connection.connect().await.err().map(|e| e.to_string());
                    let state = self.connection.state();
                    queue.extend(self.machine.connection_changed(state, detail));
                }
                // A send on a dropped link would reconnect without the platform CONNECT
                Action::Send(message) if !self.connection.state().is_connected() => {
                    debug!(
                        "Dropping {} for {}: connection {}",
                        message.type_name(),
                        message.destination_id,
                        self.connection.state()
                    );
                }
                Action::Send(message) => match encode_frame(&message) {
                    Ok(frame) => {
                        debug!(
                            "Sending {} to {} on {}",
                            message.type_name(),
                            message.destination_id,
                            message.namespace
                        );
                        self.connection.send(frame);
                    }
                    Err(e) => warn!("Failed to encode {}: {}", message.type_name(), e),
                },
                Action::Dispose => self.connection.dispose().await,
            }
        }

        if self.machine.awaiting_launch() {
            if self.launch_deadline.is_none() {
                self.launch_deadline = Some(Instant::now() + self.machine.config().launch_timeout);
            }
        } else {
            self.launch_deadline = None;
        }
    }

    fn publish(&self) {
        let current = self.machine.snapshot();
        self.snapshot.send_if_modified(|published| {
            if published == current {
                false
            } else {
                *published = current.clone();
                true
            }
        });
    }
}

async fn launch_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
