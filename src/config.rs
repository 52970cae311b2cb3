//! Configuration module for partition-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use regex::Regex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Command-line arguments for the partition function server
#[derive(Parser, Debug)]
#[command(name = "partition-server")]
#[command(author = "partition-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-protocol partition function server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on at 127.0.0.1 (ignored when --listen is given)
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7300)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrently open connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
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
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog handed to the kernel
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Longest accepted request line in bytes, excluding the newline
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// External inference tool configuration
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Program and leading arguments; the model path is appended last
    #[serde(default = "default_engine_command")]
    pub command: Vec<String>,
    /// Regex whose first capture group holds the value in the tool's stdout
    #[serde(default = "default_engine_pattern")]
    pub pattern: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            pattern: default_engine_pattern(),
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
    "127.0.0.1:7300".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_max_line_length() -> usize {
    8192
}

fn default_engine_command() -> Vec<String> {
    ["java", "-jar", "forclift.jar", "-z"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_engine_pattern() -> String {
    r"Z\s*=\s*exp\((.*?)\)".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub backlog: i32,
    pub max_line_length: usize,
    pub engine_command: Vec<String>,
    pub engine_pattern: Regex,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
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

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = match (cli.listen, cli.port) {
            (Some(listen), _) => listen,
            (None, Some(port)) => format!("127.0.0.1:{port}"),
            (None, None) => toml_config.server.listen,
        };
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let engine_command = toml_config.engine.command;
        if engine_command.is_empty() {
            return Err(ConfigError::EmptyEngineCommand);
        }
        let engine_pattern = Regex::new(&toml_config.engine.pattern)
            .map_err(|e| ConfigError::InvalidPattern(toml_config.engine.pattern.clone(), e))?;
        if engine_pattern.captures_len() < 2 {
            return Err(ConfigError::PatternWithoutCapture(toml_config.engine.pattern));
        }

        Ok(Config {
            listen,
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections)
                .clamp(1, Semaphore::MAX_PERMITS),
            backlog: toml_config.server.backlog,
            max_line_length: toml_config.server.max_line_length,
            engine_command,
            engine_pattern,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("Invalid engine output pattern '{0}': {1}")]
    InvalidPattern(String, #[source] regex::Error),

    #[error("Engine output pattern '{0}' has no capture group")]
    PatternWithoutCapture(String),

    #[error("Engine command must name a program")]
    EmptyEngineCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["partition-server"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7300");
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.server.max_line_length, 8192);
        assert_eq!(config.engine.command.last().map(String::as_str), Some("-z"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7310"
            workers = 4
            max_line_length = 512

            [engine]
            command = ["/opt/wfomc/run", "--quiet"]
            pattern = 'logZ=(\S+)'

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7310");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_line_length, 512);
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.engine.command, vec!["/opt/wfomc/run", "--quiet"]);
        assert_eq!(config.engine.pattern, r"logZ=(\S+)");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_port_argument() {
        let config = Config::merge(cli(&["7345"]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7345".parse().unwrap());
    }

    #[test]
    fn test_listen_overrides_port() {
        let config = Config::merge(
            cli(&["--listen", "0.0.0.0:9000", "7345"]),
            TomlConfig::default(),
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_cli_precedence() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            workers = 2
            max_connections = 8

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["-w", "6", "--log-level", "trace"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.workers, Some(6));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_max_connections_clamped() {
        let max = usize::MAX.to_string();
        let config =
            Config::merge(cli(&["--max-connections", &max]), TomlConfig::default()).unwrap();
        assert_eq!(config.max_connections, Semaphore::MAX_PERMITS);

        let config =
            Config::merge(cli(&["--max-connections", "0"]), TomlConfig::default()).unwrap();
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_invalid_listen() {
        let err = Config::merge(cli(&["-l", "not-an-address"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(_)));
    }

    #[test]
    fn test_engine_validation() {
        let toml_config: TomlConfig = toml::from_str("[engine]\ncommand = []\n").unwrap();
        let err = Config::merge(cli(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEngineCommand));

        let toml_config: TomlConfig = toml::from_str("[engine]\npattern = 'Z = \\S+'\n").unwrap();
        let err = Config::merge(cli(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::PatternWithoutCapture(_)));

        let toml_config: TomlConfig = toml::from_str("[engine]\npattern = '(unclosed'\n").unwrap();
        let err = Config::merge(cli(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(..)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_cli(cli(&["-c", "/no/such/config.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
