use anyhow::{Context, Result};
use castaudio_core::DeviceDescriptor;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Service type advertised by cast receivers
pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// Build a descriptor from a resolved mDNS record.
///
/// The TXT `id` is the stable identifier and `fn` the friendly name; both
/// fall back to the mDNS instance name. IPv4 addresses are preferred.
pub fn descriptor_from_service(info: &ServiceInfo) -> Option<DeviceDescriptor> {
    let addresses = info.get_addresses();
    let mut v4: Vec<_> = addresses.iter().filter(|a| a.is_ipv4()).copied().collect();
    v4.sort();
    let address = v4.first().or_else(|| addresses.iter().next())?;

    let port = info.get_port();
    let instance = instance_name(info.get_fullname());
    let name = txt(info, "fn").unwrap_or_else(|| instance.clone());
    let id = txt(info, "id").unwrap_or(instance);

    Some(DeviceDescriptor::new(id, name, address.to_string(), port))
}

fn txt(info: &ServiceInfo, key: &str) -> Option<String> {
    info.get_property_val_str(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(&format!(".{}", CAST_SERVICE_TYPE))
        .unwrap_or(fullname)
        .trim_matches('.')
        .to_string()
}

/// Browse for receivers for `timeout` and return what was found, sorted by name
pub async fn discover_devices(timeout: Duration) -> Result<Vec<DeviceDescriptor>> {
    tracing::info!("Starting mDNS discovery for cast receivers...");

    let mdns = ServiceDaemon::new().context("Failed to create mDNS service daemon")?;
    let receiver = mdns
        .browse(CAST_SERVICE_TYPE)
        .context(format!("Failed to browse for service: {}", CAST_SERVICE_TYPE))?;

    let mut found: HashMap<String, DeviceDescriptor> = HashMap::new();
    let start = std::time::Instant::now();

    while start.elapsed() < timeout {
        let event = tokio::task::spawn_blocking({
            let receiver = receiver.clone();
            move || receiver.recv_timeout(Duration::from_millis(100))
        })
        .await;

        if let Ok(Ok(ServiceEvent::ServiceResolved(info))) = event {
            if let Some(device) = descriptor_from_service(&info) {
                tracing::debug!("Discovered {} at {}", device.name, device.endpoint());
                found.insert(device.id.clone(), device);
            }
        }
    }

    mdns.shutdown().ok();

    let mut devices: Vec<_> = found.into_values().collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::info!("Discovery complete. Found {} receiver(s)", devices.len());
    Ok(devices)
}

/// Continuous discovery; browsing stops when this is dropped
pub struct DiscoveryHandle {
    daemon: ServiceDaemon,
    task: JoinHandle<()>,
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        self.daemon.shutdown().ok();
        self.task.abort();
    }
}

/// Keep browsing and call `on_found` for every resolved receiver, including
/// repeats, until the handle is dropped.
pub fn watch_devices<F>(on_found: F) -> Result<DiscoveryHandle>
where
    F: Fn(DeviceDescriptor) + Send + 'static,
{
    let daemon = ServiceDaemon::new().context("Failed to create mDNS service daemon")?;
    let receiver = daemon
        .browse(CAST_SERVICE_TYPE)
        .context(format!("Failed to browse for service: {}", CAST_SERVICE_TYPE))?;

    let task = tokio::task::spawn_blocking(move || {
        while let Ok(event) = receiver.recv() {
            match event {
                ServiceEvent::ServiceResolved(info) => {
                    if let Some(device) = descriptor_from_service(&info) {
                        tracing::debug!("Resolved {} at {}", device.name, device.endpoint());
                        on_found(device);
                    }
                }
                ServiceEvent::ServiceRemoved(_, fullname) => {
                    // Sessions keep their device; it may come back
                    tracing::debug!("Receiver went away: {}", fullname);
                }
                _ => {}
            }
        }
        tracing::debug!("mDNS watch ended");
    });

    Ok(DiscoveryHandle { daemon, task })
}
