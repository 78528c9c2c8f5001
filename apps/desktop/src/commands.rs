//! Interactive commands read from stdin

use anyhow::{bail, Context, Result};
use cast_protocol::DEFAULT_CONTROL_PORT;
use castaudio_core::DeviceDescriptor;
use std::net::{IpAddr, SocketAddr};

pub const HELP: &str = "commands: list | select <n> | play | up | down | mute | status | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    List,
    /// 1-based index into `list` output
    Select(usize),
    Play,
    Up,
    Down,
    Mute,
    Status,
    Help,
    Quit,
}

impl UserCommand {
    /// `Ok(None)` for a blank line
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "list" | "ls" => UserCommand::List,
            "select" => {
                let index: usize = words
                    .next()
                    .context("select needs a device number")?
                    .parse()
                    .context("device number must be a positive integer")?;
                if index == 0 {
                    bail!("device numbers start at 1");
                }
                UserCommand::Select(index)
            }
            "play" | "stop" | "p" => UserCommand::Play,
            "up" | "+" => UserCommand::Up,
            "down" | "-" => UserCommand::Down,
            "mute" | "m" => UserCommand::Mute,
            "status" | "s" => UserCommand::Status,
            "help" | "?" => UserCommand::Help,
            "quit" | "exit" | "q" => UserCommand::Quit,
            other => bail!("unknown command '{}'", other),
        };
        Ok(Some(command))
    }
}

/// Descriptor for a receiver given as `host[:port]`
pub fn manual_device(arg: &str) -> Result<DeviceDescriptor> {
    let arg = arg.trim();
    if arg.is_empty() {
        bail!("device address is empty");
    }

    let (host, port) = if let Ok(addr) = arg.parse::<SocketAddr>() {
        (addr.ip().to_string(), addr.port())
    } else if let Ok(ip) = arg.parse::<IpAddr>() {
        (ip.to_string(), DEFAULT_CONTROL_PORT)
    } else if let Some((host, port)) = arg.rsplit_once(':') {
        let port = port
            .parse()
            .with_context(|| format!("invalid port in device address '{}'", arg))?;
        (host.to_string(), port)
    } else {
        (arg.to_string(), DEFAULT_CONTROL_PORT)
    };

    let id = format!("manual:{}:{}", host, port);
    Ok(DeviceDescriptor::new(id, host.clone(), host, port))
}
