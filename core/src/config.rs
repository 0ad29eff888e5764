//! Configuration management

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IRC-facing server settings
    pub server: ServerConfig,
    /// TLS settings for the listener
    pub tls: TlsConfig,
    /// Workspace API settings
    pub workspace: WorkspaceConfig,
}

/// IRC-facing server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name used as the prefix of every server-originated line
    pub name: String,
    /// Address the listener binds to
    pub listen: String,
    /// Capacity of each connection's outbound line queue
    pub send_queue: usize,
    /// Message of the day, one entry per 372 line
    pub motd: Vec<String>,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether the listener speaks TLS
    pub enabled: bool,
    /// PEM certificate chain
    pub cert_file: Option<String>,
    /// PEM PKCS#8 private key
    pub key_file: Option<String>,
}

/// Workspace API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Static API credential; clients may supply one with PASS instead
    pub api_key: Option<String>,
    /// Base URL of the Web API
    pub api_url: String,
    /// Page size for paginated listings
    pub pagination: usize,
    /// Maximum bytes of message text per relayed PRIVMSG line
    pub chunk_size: usize,
    /// How long to wait for the real-time feed to become ready
    pub connect_timeout_secs: u64,
    /// Attempts per page before a rate-limited listing gives up
    pub max_api_attempts: u32,
    /// Timeout of a single HTTP request
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            listen: "127.0.0.1:6666".to_string(),
            send_queue: 256,
            motd: vec![
                "This is an IRC gateway to your team-chat workspace.".to_string(),
                "Channels you belong to are joined automatically.".to_string(),
            ],
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://slack.com/api/".to_string(),
            pagination: 200,
            chunk_size: 400,
            connect_timeout_secs: 10,
            max_api_attempts: 3,
            request_timeout_secs: 30,
        }
    }
}

impl WorkspaceConfig {
    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// HTTP request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server.listen.parse().map_err(|e| {
            Error::Config(format!("Invalid listen address {}: {}", self.server.listen, e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.name.is_empty() {
            return Err(Error::Config("Server name cannot be empty".to_string()));
        }
        if self.server.name.contains(' ') {
            return Err(Error::Config("Server name cannot contain spaces".to_string()));
        }

        self.listen_addr()?;

        if self.server.send_queue == 0 {
            return Err(Error::Config("Send queue capacity must be greater than zero".to_string()));
        }

        if self.tls.enabled {
            if self.tls.cert_file.is_none() {
                return Err(Error::Config("TLS enabled but no certificate file specified".to_string()));
            }
            if self.tls.key_file.is_none() {
                return Err(Error::Config("TLS enabled but no key file specified".to_string()));
            }
        }

        if self.workspace.pagination == 0 {
            return Err(Error::Config("Pagination must be greater than zero".to_string()));
        }
        if self.workspace.chunk_size == 0 {
            return Err(Error::Config("Chunk size must be greater than zero".to_string()));
        }
        if self.workspace.max_api_attempts == 0 {
            return Err(Error::Config("At least one API attempt is required".to_string()));
        }
        url::Url::parse(&self.workspace.api_url)
            .map_err(|e| Error::Config(format!("Invalid API URL {}: {}", self.workspace.api_url, e)))?;

        Ok(())
    }
}
