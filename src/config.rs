//! Configuration module for grow-a-httpd.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

/// Smallest accepted transfer buffer.
const MIN_BUFFER_SIZE: usize = 1024;

/// Command-line arguments for the file server
#[derive(Parser, Debug, Default)]
#[command(name = "grow-a-httpd")]
#[command(author = "grow-a-httpd authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded file server with upload support", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// First port to try; the next free port is used if it is taken
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory to serve and store uploads in (defaults to the current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Transfer chunk size in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(short, long)]
    pub max_connections: Option<usize>,

    /// Largest accepted request head in bytes
    #[arg(long)]
    pub max_header_size: Option<usize>,

    /// Poll timeout in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub root: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root: None,
            max_connections: default_max_connections(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Transfer-related configuration
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_header_size: default_max_header_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_buffer_size() -> usize {
    8192
}

fn default_max_header_size() -> usize {
    16 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub root: PathBuf,
    pub buffer_size: usize,
    pub max_connections: usize,
    pub max_header_size: usize,
    pub poll_timeout_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host_str = cli.host.unwrap_or(toml_config.server.host);
        let host = host_str
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("host '{}' is not an IP address", host_str)))?;

        let root = match cli.root.or(toml_config.server.root) {
            Some(root) => root,
            None => std::env::current_dir().map_err(|e| ConfigError::Root(PathBuf::from("."), e))?,
        };
        let root = root
            .canonicalize()
            .map_err(|e| ConfigError::Root(root.clone(), e))?;
        if !root.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "root '{}' is not a directory",
                root.display()
            )));
        }

        let buffer_size = cli.buffer_size.unwrap_or(toml_config.transfer.buffer_size);
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer size must be at least {} bytes",
                MIN_BUFFER_SIZE
            )));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max connections must be positive".to_string(),
            ));
        }

        Ok(Config {
            host,
            port: cli.port.unwrap_or(toml_config.server.port),
            root,
            buffer_size,
            max_connections,
            max_header_size: cli
                .max_header_size
                .unwrap_or(toml_config.transfer.max_header_size),
            poll_timeout_ms: cli
                .poll_timeout_ms
                .unwrap_or(toml_config.server.poll_timeout_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Root(PathBuf, std::io::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Root(path, e) => {
                write!(f, "Cannot serve '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
