//! Configuration loading for the campaign server.
//!
//! Configuration is loaded from a TOML file (default: `campaign-server.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use sync_types::MAX_CHUNK_PAYLOAD;

/// Default TCP port, shared with clients.
pub const DEFAULT_PORT: u16 = 51234;

/// Root configuration for the campaign server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and credentials.
    pub server: ServerConfig,
    /// Asset storage and transfer.
    pub assets: AssetsConfig,
    /// Connection limits.
    pub limits: LimitsConfig,
    /// Directory registration.
    pub directory: DirectoryConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
}

/// Listener and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the game listener (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port (default: 51234).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Password required to join as GM. Unset means no password.
    pub gm_password: Option<String>,
    /// Password required to join as a player. Unset means no password.
    pub player_password: Option<String>,
}

/// Asset storage and transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    /// Directory of the content-addressed asset store (default: assets).
    #[serde(default = "default_assets_root")]
    pub root: PathBuf,
    /// Directory for partially received uploads (default: staging).
    #[serde(default = "default_staging")]
    pub staging: PathBuf,
    /// Maximum chunk payload in bytes (default: 64 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Inbound transfers with no progress for this long are abandoned (default: 120).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Timeout in seconds for receiving the handshake after connect (default: 10).
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
    /// Chunks buffered per connection ahead of the socket (default: 4).
    #[serde(default = "default_chunk_queue_depth")]
    pub chunk_queue_depth: usize,
    /// Messages buffered per connection before it is dropped as too slow
    /// (default: 4096).
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

/// Directory registration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Announce this server to a directory (default: false).
    #[serde(default)]
    pub register: bool,
    /// Directory base URL.
    #[serde(default = "default_directory_url")]
    pub url: String,
    /// Name to announce (default: campaign).
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Base heartbeat interval in seconds (default: 420).
    #[serde(default = "default_directory_interval")]
    pub interval_secs: u64,
    /// Random jitter added to each interval, in seconds (default: 20).
    #[serde(default = "default_directory_jitter")]
    pub jitter_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve /health and /metrics (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bind address for HTTP server (default: 127.0.0.1:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Enable cleanup task (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cleanup interval in seconds (default: 30).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_assets_root() -> PathBuf {
    PathBuf::from("assets")
}

fn default_staging() -> PathBuf {
    PathBuf::from("staging")
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_hello_timeout_secs() -> u64 {
    10
}

fn default_chunk_queue_depth() -> usize {
    4
}

fn default_outbound_queue_depth() -> usize {
    4096
}

fn default_directory_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_server_name() -> String {
    "campaign".to_string()
}

fn default_directory_interval() -> u64 {
    7 * 60
}

fn default_directory_jitter() -> u64 {
    20
}

fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            gm_password: None,
            player_password: None,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: default_assets_root(),
            staging: default_staging(),
            chunk_size: default_chunk_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hello_timeout_secs: default_hello_timeout_secs(),
            chunk_queue_depth: default_chunk_queue_depth(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            register: false,
            url: default_directory_url(),
            server_name: default_server_name(),
            interval_secs: default_directory_interval(),
            jitter_secs: default_directory_jitter(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_http_bind(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_cleanup_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is out of range.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.chunk_size == 0 {
            return Err(ConfigError::Invalid("assets.chunk_size must be > 0".into()));
        }
        if self.assets.chunk_size > MAX_CHUNK_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "assets.chunk_size must be <= {} to fit in one frame",
                MAX_CHUNK_PAYLOAD
            )));
        }
        if self.limits.chunk_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "limits.chunk_queue_depth must be > 0".into(),
            ));
        }
        if self.limits.outbound_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "limits.outbound_queue_depth must be > 0".into(),
            ));
        }
        if self.directory.register && self.directory.url.is_empty() {
            return Err(ConfigError::Invalid(
                "directory.url is required when directory.register is set".into(),
            ));
        }
        Ok(())
    }

    /// Socket address for the game listener.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
