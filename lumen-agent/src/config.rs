//! Agent configuration
//!
//! Defines all configurable parameters for the agent: coordination service
//! connection, polling and heartbeat cadences, reconnect policy, and where
//! the file-backed catalog and presets live.

use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
///
/// Cadences are fixed for the life of the process; nothing here is
/// negotiated with the coordination service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name reported in the `register` message
    pub client_name: String,

    /// Coordination service base URL (e.g., "http://localhost:8765")
    pub coordinator_url: String,

    /// How often to ask the service for the next job
    pub poll_interval: Duration,

    /// How often to send a `ping` while connected
    pub heartbeat_interval: Duration,

    /// Pause between handshake attempts, and after a failed receive-poll
    pub reconnect_delay: Duration,

    /// Handshake attempts before the agent gives up on the push channel
    pub max_reconnect_attempts: u32,

    /// Pause after a receive-poll that returned no messages
    pub receive_idle_delay: Duration,

    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,

    /// Whether to open the emulated push channel at all
    pub push_enabled: bool,

    /// Channels named in the `subscribe` message
    pub channels: Vec<String>,

    /// JSON file backing the catalog
    pub catalog_path: PathBuf,

    /// Root directory of the preset folder hierarchy
    pub presets_dir: PathBuf,

    /// Photo to mark as selected at startup
    pub selected_photo: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(client_name: String, coordinator_url: String) -> Self {
        Self {
            client_name,
            coordinator_url,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            receive_idle_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            push_enabled: true,
            channels: vec!["jobs".to_string()],
            catalog_path: PathBuf::from("catalog.json"),
            presets_dir: PathBuf::from("presets"),
            selected_photo: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - COORDINATOR_URL (required)
    /// - CLIENT_NAME (optional, default: lumen-agent-<uuid>)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - RECONNECT_DELAY (optional, seconds, default: 5)
    /// - MAX_RECONNECT_ATTEMPTS (optional, default: 10)
    /// - RECEIVE_IDLE_DELAY (optional, seconds, default: 1)
    /// - REQUEST_TIMEOUT (optional, seconds, default: 60)
    /// - PUSH_ENABLED (optional, default: true)
    /// - SUBSCRIBE_CHANNELS (optional, comma separated, default: jobs)
    /// - CATALOG_PATH (optional, default: catalog.json)
    /// - PRESETS_DIR (optional, default: presets)
    /// - SELECTED_PHOTO (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let coordinator_url = std::env::var("COORDINATOR_URL")
            .map_err(|_| anyhow::anyhow!("COORDINATOR_URL environment variable not set"))?;

        let client_name = std::env::var("CLIENT_NAME").unwrap_or_else(|_| default_client_name());

        let mut config = Self::new(client_name, coordinator_url);

        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("HEARTBEAT_INTERVAL") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RECONNECT_DELAY") {
            config.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(secs) = env_parse::<u64>("RECEIVE_IDLE_DELAY") {
            config.receive_idle_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("REQUEST_TIMEOUT") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_parse::<bool>("PUSH_ENABLED") {
            config.push_enabled = enabled;
        }
        if let Ok(channels) = std::env::var("SUBSCRIBE_CHANNELS") {
            config.channels = parse_channels(&channels);
        }
        if let Ok(path) = std::env::var("CATALOG_PATH") {
            config.catalog_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("PRESETS_DIR") {
            config.presets_dir = PathBuf::from(path);
        }
        config.selected_photo = std::env::var("SELECTED_PHOTO")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_name.is_empty() {
            anyhow::bail!("client_name cannot be empty");
        }

        if self.coordinator_url.is_empty() {
            anyhow::bail!("coordinator_url cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("max_reconnect_attempts must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_client_name(), "http://localhost:8765".to_string())
    }
}

fn default_client_name() -> String {
    format!("lumen-agent-{}", uuid::Uuid::new_v4().simple())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn parse_channels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
