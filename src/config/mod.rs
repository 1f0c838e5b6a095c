//! Configuration module

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Upstream Trojan server
    pub trojan: TrojanConfig,

    /// Local SOCKS5 listener
    pub local: LocalConfig,

    /// Routing rules
    pub routing: RoutingConfig,

    /// Log settings
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    /// Load from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.trojan.server.is_empty() {
            return Err(Error::config("trojan.server cannot be empty"));
        }
        if self.trojan.password.is_empty() {
            return Err(Error::config("trojan.password cannot be empty"));
        }
        if self.trojan.port == 0 {
            return Err(Error::config("trojan.port must be in 1-65535"));
        }
        if self.local.port == 0 {
            return Err(Error::config("local.port must be in 1-65535"));
        }
        if !matches!(
            self.log.level.as_str(),
            "DEBUG" | "INFO" | "WARNING" | "ERROR"
        ) {
            return Err(Error::config(format!(
                "Unknown log level: {}",
                self.log.level
            )));
        }
        Ok(())
    }
}

/// Upstream Trojan server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrojanConfig {
    /// Server host
    pub server: String,

    /// Server port
    pub port: u16,

    /// Password (hashed at startup, plaintext not retained)
    pub password: String,

    /// Verify the server certificate chain and hostname
    pub verify_ssl: bool,

    /// SNI override (empty = use server)
    pub sni: String,
}

impl TrojanConfig {
    /// The server name indicated during the TLS handshake
    pub fn sni(&self) -> &str {
        if self.sni.is_empty() {
            &self.server
        } else {
            &self.sni
        }
    }

    /// `server:port` for display
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

impl Default for TrojanConfig {
    fn default() -> Self {
        TrojanConfig {
            server: String::new(),
            port: 443,
            password: String::new(),
            verify_ssl: true,
            sni: String::new(),
        }
    }
}

/// Local SOCKS5 listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Bind address
    pub listen: String,

    /// Bind port
    pub port: u16,
}

impl LocalConfig {
    /// `listen:port` for binding
    pub fn bind_addr(&self) -> String {
        if self.listen.contains(':') {
            format!("[{}]:{}", self.listen, self.port)
        } else {
            format!("{}:{}", self.listen, self.port)
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            listen: "127.0.0.1".to_string(),
            port: 1080,
        }
    }
}

/// Routing configuration: two ordered lists of glob patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Hosts matching these patterns are dialed directly
    pub direct_domains: Vec<String>,

    /// Hosts matching these patterns go through the Trojan upstream
    pub proxy_domains: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            direct_domains: Vec::new(),
            proxy_domains: vec!["*".to_string()],
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of DEBUG, INFO, WARNING, ERROR
    pub level: String,

    /// Per-chunk relay traffic lines at debug
    pub verbose_traffic: bool,

    /// Log HTTP request/status lines seen in relayed plaintext
    pub show_http_details: bool,
}

impl LogConfig {
    /// Map the config level onto a tracing directive level
    pub fn tracing_level(&self) -> &'static str {
        match self.level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "INFO".to_string(),
            verbose_traffic: false,
            show_http_details: false,
        }
    }
}
