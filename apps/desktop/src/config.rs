use anyhow::{Context, Result};
use castaudio_device_cast::{TransportConfig, TrustPolicy};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stream_server::{SampleFormat, StreamConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cast: CastSection,
    pub stream: StreamSection,
    pub discovery: DiscoverySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CastSection {
    pub app_id: String,
    pub connect_timeout_secs: u64,
    pub launch_timeout_secs: u64,
    pub trust: TrustPolicy,
    pub sender_id: String,
}

impl Default for CastSection {
    fn default() -> Self {
        Self {
            app_id: cast_protocol::DEFAULT_MEDIA_RECEIVER_APP_ID.to_string(),
            connect_timeout_secs: 5,
            launch_timeout_secs: 30,
            trust: TrustPolicy::default(),
            sender_id: cast_protocol::PLATFORM_SENDER_ID.to_string(),
        }
    }
}

impl CastSection {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            trust: self.trust,
        }
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub bind: SocketAddr,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Drop-oldest window per listener
    pub buffer_ms: u32,
}

impl Default for StreamSection {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            format: stream.format,
            buffer_ms: stream.buffer_ms,
        }
    }
}

impl StreamSection {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: self.format,
            buffer_ms: self.buffer_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the platform config file when `path` is
    /// `None`. A missing default file yields defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.stream.stream_config().validate()?;
        Ok(config)
    }
}

/// `<config dir>/castaudio/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("castaudio").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.cast.app_id, "CC1AD845");
        assert_eq!(config.cast.sender_id, "sender-0");
        assert_eq!(config.cast.connect_timeout_secs, 5);
        assert_eq!(config.cast.launch_timeout(), Duration::from_secs(30));
        assert_eq!(config.cast.trust, TrustPolicy::AcceptAny);
        assert_eq!(config.stream.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.stream.stream_config(), StreamConfig::default());
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.timeout_secs, 5);
    }

    #[test]
    fn test_sections_override_fields() {
        let config = AppConfig::parse(
            r#"
            [cast]
            trust = "system_roots"
            launch_timeout_secs = 10

            [stream]
            bind = "127.0.0.1:9000"
            format = "S24LE"
            buffer_ms = 500

            [discovery]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.cast.trust, TrustPolicy::SystemRoots);
        assert_eq!(config.cast.launch_timeout_secs, 10);
        assert_eq!(config.cast.connect_timeout_secs, 5);
        assert_eq!(config.stream.bind.port(), 9000);
        assert_eq!(config.stream.format, SampleFormat::S24LE);
        assert_eq!(config.stream.buffer_ms, 500);
        assert_eq!(config.stream.sample_rate, 48000);
        assert!(!config.discovery.enabled);

        let transport = config.cast.transport();
        assert_eq!(transport.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_stream_is_rejected() {
        assert!(AppConfig::parse("[stream]\nchannels = 0\n").is_err());
        assert!(AppConfig::parse("[cast]\ntrust = \"sometimes\"\n").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/castaudio.toml"))).is_err());
    }
}
