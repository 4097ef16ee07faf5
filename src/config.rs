//! Configuration for the relay binaries.
//!
//! The server supports command-line arguments and an optional TOML
//! configuration file; CLI arguments take precedence over file values.
//! The client is configured purely from the command line.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the relay server
#[derive(Parser, Debug)]
#[command(name = "relay-server")]
#[command(version = "0.1.0")]
#[command(about = "A TCP broadcast relay server", long_about = None)]
pub struct ServerArgs {
    /// Port to listen on (0 picks an ephemeral port)
    #[arg(value_name = "PORT")]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Command-line arguments for the relay client
#[derive(Parser, Debug)]
#[command(name = "relay-client")]
#[command(version = "0.1.0")]
#[command(about = "Bridges stdin/stdout to a relay server", long_about = None)]
pub struct ClientArgs {
    /// Server host to connect to
    #[arg(value_name = "HOST")]
    pub host: String,

    /// Server port to connect to
    #[arg(value_name = "PORT")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    pub port: Option<u16>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(ServerArgs::parse())
    }

    /// Merge parsed CLI args with TOML file values (CLI takes precedence).
    pub fn resolve(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;

        Ok(ServerConfig {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args.
    pub fn load() -> Self {
        let cli = ClientArgs::parse();
        ClientConfig {
            host: cli.host,
            port: cli.port,
            log_level: cli.log_level,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
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
            ConfigError::MissingPort => {
                write!(f, "No port given on the command line or in the config file")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(port: Option<u16>, host: Option<&str>) -> ServerArgs {
        ServerArgs {
            port,
            host: host.map(str::to_string),
            config: None,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 40123

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, Some(40123));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_port_resolves() {
        let config = ServerConfig::resolve(args(Some(31337), None)).unwrap();
        assert_eq!(config.port, 31337);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_port_is_an_error() {
        let err = ServerConfig::resolve(args(None, None)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));
    }

    #[test]
    fn test_cli_host_overrides_default() {
        let config = ServerConfig::resolve(args(Some(1), Some("0.0.0.0"))).unwrap();
        assert_eq!(config.host, "0.0.0.0");
    }
}
