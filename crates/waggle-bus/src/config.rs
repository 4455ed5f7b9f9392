//! Bus configuration.
//!
//! Loaded from `~/.waggle/config.toml` with environment-variable overrides;
//! environment variables take precedence over file values.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Scheme::Ws => 8083,
            Scheme::Wss => 8084,
        }
    }
}

/// Which wire binding the bus speaks, chosen once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    #[default]
    Broker,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Durable backend: "postgres", "memory", or absent for staging-only.
    pub backend: Option<String>,
    /// Backend connection string (postgres only).
    pub url: Option<String>,
    /// Capacity of the in-memory staging buffer.
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    /// Retention TTL applied to stored events regardless of status.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl PersistenceSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: None,
            url: None,
            memory_size: default_memory_size(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_memory_size() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_report_channel() -> String {
    "monitoring".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Agent name; also names the publication topic. Defaults to hostname.
    pub name: Option<String>,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults to the scheme's conventional port.
    pub port: Option<u16>,
    /// CA bundle (PEM) for wss endpoints with a private authority.
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub binding: BindingKind,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default = "default_report_channel")]
    pub report_channel: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: None,
            scheme: Scheme::default(),
            host: default_host(),
            port: None,
            certificate: None,
            binding: BindingKind::default(),
            persistence: PersistenceSettings::default(),
            report_channel: default_report_channel(),
        }
    }
}

impl BusConfig {
    /// Load config from file and environment variables.
    /// Environment variables take precedence over file config.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_default();

        if let Ok(name) = std::env::var("WAGGLE_AGENT_NAME") {
            config.name = Some(name);
        }
        if let Ok(host) = std::env::var("WAGGLE_BUS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("WAGGLE_BUS_PORT") {
            config.port = Some(port.parse()?);
        }
        if let Ok(scheme) = std::env::var("WAGGLE_BUS_SCHEME") {
            config.scheme = match scheme.to_lowercase().as_str() {
                "wss" => Scheme::Wss,
                _ => Scheme::Ws,
            };
        }
        if let Ok(binding) = std::env::var("WAGGLE_BUS_BINDING") {
            config.binding = match binding.to_lowercase().as_str() {
                "group" => BindingKind::Group,
                _ => BindingKind::Broker,
            };
        }
        if let Ok(url) = std::env::var("WAGGLE_PERSISTENCE_URL") {
            config.persistence.backend.get_or_insert_with(|| "postgres".to_string());
            config.persistence.url = Some(url);
        }
        if let Ok(channel) = std::env::var("WAGGLE_REPORT_CHANNEL") {
            config.report_channel = channel;
        }

        Ok(config)
    }

    fn load_from_file() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: BusConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".waggle/config.toml")
    }

    /// Agent name, falling back to the machine hostname.
    pub fn agent_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "waggle".to_string()),
        }
    }

    /// Websocket endpoint of the bus server.
    pub fn endpoint(&self) -> String {
        let port = self.port.unwrap_or_else(|| self.scheme.default_port());
        format!("{}://{}:{}/bus", self.scheme.as_str(), self.host, port)
    }
}
