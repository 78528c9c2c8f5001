mod commands;
mod config;

use anyhow::{Context, Result};
use cast_protocol::MediaInformation;
use castaudio_core::{DeviceControl, DeviceDescriptor};
use castaudio_device_cast::{
    discover_devices, watch_devices, DeviceRegistry, RegistryEvent, SessionConfig,
};
use clap::Parser;
use commands::{manual_device, UserCommand, HELP};
use config::AppConfig;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stream_server::{stream_url, AudioHub, InputPump, PcmSource, StreamServer, STREAM_PATH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cast live PCM audio to receivers on the local network
#[derive(Parser, Debug)]
#[command(name = "castaudio", version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the stream server listens on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Receiver to use as host[:port], skipping discovery
    #[arg(long)]
    device: Option<String>,

    /// Raw PCM input: a file or FIFO, or `-` for stdin. Silence when absent.
    #[arg(long)]
    input: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,castaudio=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting castaudio");

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.stream.bind = bind;
    }

    // Stream server and PCM input
    let hub = AudioHub::new(config.stream.stream_config());
    let mut server = StreamServer::start(config.stream.bind, hub.clone()).await?;
    let source = cli
        .input
        .as_deref()
        .map(PcmSource::from_arg)
        .unwrap_or(PcmSource::Silence);
    let commands_on_stdin = source != PcmSource::Stdin;
    let mut pump = InputPump::start(source, hub.publisher()).await?;

    // Registry: one session per receiver, each loading this server's stream
    let server_addr = server.local_addr();
    let cast = config.cast.clone();
    let registry = Arc::new(DeviceRegistry::with_cast_sessions(
        cast.transport(),
        move |device| {
            let mut session = SessionConfig::new(MediaInformation::live(
                media_url(server_addr, device),
                "audio/wav",
            ));
            session.app_id = cast.app_id.clone();
            session.sender_id = cast.sender_id.clone();
            session.launch_timeout = cast.launch_timeout();
            session
        },
    ));
    let events = tokio::spawn(log_registry_events(registry.subscribe()));

    // Receivers: a manual one, or mDNS
    let _discovery = match cli.device.as_deref() {
        Some(arg) => {
            let device = manual_device(arg)?;
            tracing::info!("Using receiver {}", device.endpoint());
            registry.on_device_discovered(device);
            None
        }
        None if config.discovery.enabled => {
            let timeout = Duration::from_secs(config.discovery.timeout_secs);
            for device in discover_devices(timeout).await? {
                registry.on_device_discovered(device);
            }
            let watcher = Arc::clone(&registry);
            Some(watch_devices(move |device| watcher.on_device_discovered(device))?)
        }
        None => {
            tracing::warn!("Discovery disabled and no --device given; no receivers to control");
            None
        }
    };

    if commands_on_stdin {
        println!("{}", HELP);
        command_loop(&registry).await?;
    } else {
        tracing::info!("PCM input is stdin; press Ctrl-C to quit");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    }

    tracing::info!("Shutting down");
    registry.shutdown().await;
    events.abort();
    pump.stop().await;
    server.stop().await;

    Ok(())
}

/// LOAD `contentId` for `device`: this server as reachable from the receiver
fn media_url(server_addr: SocketAddr, device: &DeviceDescriptor) -> String {
    let resolved = device
        .host
        .parse::<IpAddr>()
        .ok()
        .or_else(|| {
            (device.host.as_str(), device.port)
                .to_socket_addrs()
                .ok()?
                .map(|addr| addr.ip())
                .next()
        })
        .context("receiver address does not resolve")
        .and_then(|ip| stream_url(server_addr, ip));

    match resolved {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(
                "Could not pick a stream address for {}: {:#}; using {}",
                device.name,
                e,
                server_addr
            );
            format!("http://{}{}", server_addr, STREAM_PATH)
        }
    }
}

async fn log_registry_events(mut events: tokio::sync::broadcast::Receiver<RegistryEvent>) {
    loop {
        match events.recv().await {
            Ok(RegistryEvent::DeviceAdded(device)) => {
                tracing::info!("Found receiver {} at {}", device.name, device.endpoint());
            }
            Ok(RegistryEvent::DeviceUpdated(device)) => {
                tracing::info!("Receiver {} moved to {}", device.name, device.endpoint());
            }
            Ok(RegistryEvent::ActiveChanged(id)) => {
                tracing::debug!("Active receiver is now {}", id);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn command_loop(registry: &DeviceRegistry) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read command")?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else {
            break;
        };

        let command = match UserCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}; {}", e, HELP);
                continue;
            }
        };

        match command {
            UserCommand::List => print_devices(registry),
            UserCommand::Select(index) => {
                match registry.devices().get(index - 1) {
                    Some(entry) => {
                        registry.set_active(&entry.descriptor.id);
                        println!("Selected {}", entry.descriptor.name);
                    }
                    None => println!("No receiver {}; try `list`", index),
                }
            }
            UserCommand::Play => registry.play_pause().await,
            UserCommand::Up => registry.volume_up().await,
            UserCommand::Down => registry.volume_down().await,
            UserCommand::Mute => registry.volume_mute().await,
            UserCommand::Status => {
                registry.get_status().await;
                print_status(registry);
            }
            UserCommand::Help => println!("{}", HELP),
            UserCommand::Quit => break,
        }
    }

    Ok(())
}

fn print_devices(registry: &DeviceRegistry) {
    let active = registry.active().map(|entry| entry.descriptor.id);
    let devices = registry.devices();
    if devices.is_empty() {
        println!("No receivers found yet");
        return;
    }
    for (i, entry) in devices.iter().enumerate() {
        let marker = if active.as_deref() == Some(entry.descriptor.id.as_str()) {
            "*"
        } else {
            " "
        };
        let snapshot = entry.session.snapshot();
        println!(
            "{} {}. {} ({}) [{}]",
            marker,
            i + 1,
            entry.descriptor.name,
            entry.descriptor.endpoint(),
            snapshot.state
        );
    }
}

fn print_status(registry: &DeviceRegistry) {
    let Some(entry) = registry.active() else {
        println!("No active receiver");
        return;
    };
    let snapshot = entry.session.snapshot();
    println!(
        "{}: session {}, connection {}, volume {:.2}{}",
        snapshot.device.name,
        snapshot.state,
        snapshot.connection,
        snapshot.volume.level,
        if snapshot.volume.muted { " (muted)" } else { "" }
    );
    if let Some(app) = &snapshot.application {
        println!("  app: {} ({})", app.display_name, app.app_id);
    }
    if let Some(player) = &snapshot.player_state {
        println!("  player: {}", player);
    }
    if let Some(error) = &snapshot.last_error {
        println!("  last error: {}", error);
    }
}
