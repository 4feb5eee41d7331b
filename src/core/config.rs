//! # Bot Configuration Schema
//!
//! YAML-based configuration with per-server defaults merging and full
//! validation. Secrets (API keys) come from the environment, not the file.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Added sandbox/history/auth sections with documented defaults
//! - 1.0.0: Initial release with server list and defaults block

use anyhow::Result;
use serde::Deserialize;

/// Root configuration for the bot
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Defaults merged under every server entry
    #[serde(default)]
    pub defaults: ServerDefaults,

    /// Servers to connect to
    pub servers: Vec<ServerEntry>,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve every server entry against the defaults block
    pub fn servers(&self) -> Vec<ServerConfig> {
        self.servers
            .iter()
            .map(|entry| entry.merged(&self.defaults))
            .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(anyhow::anyhow!("No servers configured"));
        }

        for server in self.servers() {
            if server.host.is_empty() {
                return Err(anyhow::anyhow!("Server '{}' has no host", server.name));
            }

            if server.command_prefix.is_empty() {
                return Err(anyhow::anyhow!(
                    "Server '{}' has an empty command prefix",
                    server.name
                ));
            }

            for channel in &server.channels {
                if !channel.starts_with('#') {
                    return Err(anyhow::anyhow!(
                        "Channel '{}' on server '{}' must start with '#'",
                        channel,
                        server.name
                    ));
                }
            }
        }

        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow::anyhow!("sandbox.timeout_secs must be at least 1"));
        }

        if self.history.capacity == 0 {
            return Err(anyhow::anyhow!("history.capacity must be at least 1"));
        }

        Ok(())
    }
}

/// Connection defaults applied to every server unless overridden
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerDefaults {
    pub nick: String,
    pub username: String,
    pub version: String,
    pub account: Option<String>,
    pub password: Option<String>,
    pub command_prefix: String,
    pub port: u16,
    pub use_tls: bool,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        ServerDefaults {
            nick: "chxtbot".to_string(),
            username: "chxtbox".to_string(),
            version: "ChxtBox unstable".to_string(),
            account: None,
            password: None,
            command_prefix: "!!".to_string(),
            port: 6697,
            use_tls: true,
        }
    }
}

/// One server entry as written in the file; unset fields fall back to defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    /// Identifier used for dashboard lookups (defaults to the host)
    pub name: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub nick: Option<String>,
    pub username: Option<String>,
    pub version: Option<String>,
    pub account: Option<String>,
    pub password: Option<String>,
    pub command_prefix: Option<String>,
    pub use_tls: Option<bool>,
    #[serde(default)]
    pub channels: Vec<String>,
}

impl ServerEntry {
    fn merged(&self, defaults: &ServerDefaults) -> ServerConfig {
        ServerConfig {
            name: self.name.clone().unwrap_or_else(|| self.host.clone()),
            host: self.host.clone(),
            port: self.port.unwrap_or(defaults.port),
            nick: self.nick.clone().unwrap_or_else(|| defaults.nick.clone()),
            username: self
                .username
                .clone()
                .unwrap_or_else(|| defaults.username.clone()),
            version: self
                .version
                .clone()
                .unwrap_or_else(|| defaults.version.clone()),
            account: self.account.clone().or_else(|| defaults.account.clone()),
            password: self.password.clone().or_else(|| defaults.password.clone()),
            command_prefix: self
                .command_prefix
                .clone()
                .unwrap_or_else(|| defaults.command_prefix.clone()),
            use_tls: self.use_tls.unwrap_or(defaults.use_tls),
            channels: self.channels.clone(),
        }
    }
}

/// A fully resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub username: String,
    pub version: String,
    pub account: Option<String>,
    pub password: Option<String>,
    pub command_prefix: String,
    pub use_tls: bool,
    pub channels: Vec<String>,
}

/// Sandbox execution limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit for one script execution
    pub timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig { timeout_secs: 10 }
    }
}

/// Channel history limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Messages kept per channel; oldest evicted first
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig { capacity: 100 }
    }
}

/// Dashboard auth-token settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL the magic link is built from
    pub base_url: String,
    /// Token validity window in hours
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            base_url: "http://localhost:3000".to_string(),
            token_ttl_hours: 24,
        }
    }
}

/// Database location
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "chxt.db".to_string(),
        }
    }
}
