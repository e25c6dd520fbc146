//! Configuration module for the bulk-stream server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::bulk::payload::{DEFAULT_CHUNK_SIZE, DEFAULT_TOTAL_SIZE};
use crate::protocols::bulk::{PayloadMode, StreamSettings};
use crate::protocols::websocket::frame;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Smallest accepted read buffer. Upgraded connections never fill it: data
/// payloads are skipped as they arrive and a whole control frame always fits.
pub const MIN_READ_BUFFER_SIZE: usize = 256;

const _: () = assert!(MIN_READ_BUFFER_SIZE > frame::MAX_CONTROL_FRAME);

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "bulk-stream")]
#[command(author = "bulk-stream authors")]
#[command(version = "0.1.0")]
#[command(about = "Streams one large WebSocket message to every client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7681)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Total size of the streamed message in bytes
    #[arg(long)]
    pub total_size: Option<usize>,

    /// Maximum bytes sent per writable notification
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Message content
    #[arg(long, value_enum)]
    pub payload: Option<PayloadMode>,

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
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum concurrent connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Inbound buffer per connection; bounds the handshake request size
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Outbound bytes a connection may hold before fragments are refused
    #[serde(default = "default_max_pending_write")]
    pub max_pending_write: usize,
    /// Subprotocol echoed back when a client offers it
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            read_buffer_size: default_read_buffer_size(),
            max_pending_write: default_max_pending_write(),
            subprotocol: default_subprotocol(),
        }
    }
}

/// Message-related configuration
#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_total_size")]
    pub total_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub payload: PayloadMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            total_size: default_total_size(),
            chunk_size: default_chunk_size(),
            payload: PayloadMode::default(),
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

fn default_listen() -> String {
    "127.0.0.1:7681".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_max_pending_write() -> usize {
    64 * 1024
}

fn default_subprotocol() -> String {
    "lws-minimal-pmd-bulk".to_string()
}

fn default_total_size() -> usize {
    DEFAULT_TOTAL_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    /// 0 means one worker per CPU core.
    pub workers: usize,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub max_pending_write: usize,
    pub subprotocol: String,
    pub total_size: usize,
    pub chunk_size: usize,
    pub payload: PayloadMode,
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
        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.or(toml_config.server.workers).unwrap_or(0),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            read_buffer_size: toml_config.server.read_buffer_size,
            max_pending_write: toml_config.server.max_pending_write,
            subprotocol: toml_config.server.subprotocol,
            total_size: cli.total_size.unwrap_or(toml_config.stream.total_size),
            chunk_size: cli.chunk_size.unwrap_or(toml_config.stream.chunk_size),
            payload: cli.payload.unwrap_or(toml_config.stream.payload),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.total_size == 0 {
            return Err(ConfigError::Invalid("total_size must be greater than 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.read_buffer_size < MIN_READ_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "read_buffer_size must be at least {MIN_READ_BUFFER_SIZE}"
            )));
        }

        // A fragment that can never fit in pending output would abort every stream.
        let largest = self.chunk_size.min(self.total_size);
        let frame_len = frame::header_len(largest) + largest;
        if self.max_pending_write < frame_len {
            return Err(ConfigError::Invalid(format!(
                "max_pending_write ({}) must hold one full fragment ({} bytes)",
                self.max_pending_write, frame_len
            )));
        }
        Ok(())
    }

    /// Message shape handed to every connection's producer.
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            total_size: self.total_size,
            chunk_size: self.chunk_size,
            mode: self.payload,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7681");
        assert_eq!(config.server.read_buffer_size, 4096);
        assert_eq!(config.server.subprotocol, "lws-minimal-pmd-bulk");
        assert_eq!(config.stream.total_size, 133_700);
        assert_eq!(config.stream.chunk_size, 1024);
        assert_eq!(config.stream.payload, PayloadMode::Incompressible);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            workers = 4
            max_pending_write = 8192

            [stream]
            total_size = 3000
            chunk_size = 512
            payload = "compressible"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_pending_write, 8192);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.stream.total_size, 3000);
        assert_eq!(config.stream.chunk_size, 512);
        assert_eq!(config.stream.payload, PayloadMode::Compressible);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [stream]
            total_size = 3000
            payload = "compressible"
            "#,
        )
        .unwrap();
        let cli = CliArgs {
            total_size: Some(5000),
            log_level: Some("trace".into()),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.total_size, 5000);
        assert_eq!(config.payload, PayloadMode::Compressible);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.workers, 0);
        assert_eq!(config.log_level, "trace");

        let settings = config.stream_settings();
        assert_eq!(settings.total_size, 5000);
        assert_eq!(settings.mode, PayloadMode::Compressible);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let cli = CliArgs {
            chunk_size: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));

        let cli = CliArgs {
            total_size: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_pending_limit_below_fragment() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            max_pending_write = 1000

            [stream]
            chunk_size = 1024
            "#,
        )
        .unwrap();
        assert!(matches!(
            Config::merge(CliArgs::default(), toml_config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_read_buffer_holds_control_frame() {
        let mut toml_config = TomlConfig::default();
        toml_config.server.read_buffer_size = MIN_READ_BUFFER_SIZE - 1;
        assert!(matches!(
            Config::merge(CliArgs::default(), toml_config),
            Err(ConfigError::Invalid(_))
        ));

        let mut toml_config = TomlConfig::default();
        toml_config.server.read_buffer_size = MIN_READ_BUFFER_SIZE;
        let config = Config::merge(CliArgs::default(), toml_config).unwrap();
        assert!(config.read_buffer_size > frame::MAX_CONTROL_FRAME);
    }

    #[test]
    fn test_unknown_payload_mode() {
        let result: Result<TomlConfig, _> = toml::from_str(
            r#"
            [stream]
            payload = "zeros"
            "#,
        );
        assert!(result.is_err());
    }
}
