//! Configuration module for chainscore.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "chainscore")]
#[command(author = "chainscore authors")]
#[command(version = "0.1.0")]
#[command(about = "Generate text chains and score them over TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scoring server
    Serve(ServeArgs),
    /// Generate chains, send them to a server and collect the results
    Send(SendArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind to (host:port)
    #[arg(short = 'a', long)]
    pub listen: Option<String>,

    /// Log file written by the log aggregator
    #[arg(short = 'l', long)]
    pub log_file: Option<PathBuf>,

    /// Read size per transport read, in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct SendArgs {
    /// Server address (host:port)
    #[arg(short = 'a', long)]
    pub address: Option<String>,

    /// Number of chains to generate
    #[arg(short = 'n', long)]
    pub chains: Option<u64>,

    /// Chains generated per worker task
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Number of generation workers (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// File receiving every generated chain
    #[arg(long)]
    pub chains_file: Option<PathBuf>,

    /// File receiving every scored result
    #[arg(long)]
    pub results_file: Option<PathBuf>,

    /// Read size per transport read and file buffer size, in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Seed for reproducible generation
    #[arg(long)]
    pub seed: Option<u64>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_address")]
    pub listen: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_address(),
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_chains")]
    pub chains: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Generation workers
    pub workers: Option<usize>,
    #[serde(default = "default_chains_file")]
    pub chains_file: PathBuf,
    #[serde(default = "default_results_file")]
    pub results_file: PathBuf,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    pub seed: Option<u64>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            chains: default_chains(),
            chunk_size: default_chunk_size(),
            workers: None,
            chains_file: default_chains_file(),
            results_file: default_results_file(),
            buffer_size: default_buffer_size(),
            seed: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Server log file
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    /// Mirror server events to stderr
    #[serde(default)]
    pub console: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            console: false,
        }
    }
}

fn default_address() -> String {
    "localhost:3000".to_string()
}

fn default_buffer_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_connections() -> usize {
    10_000
}

fn default_chains() -> u64 {
    1_000_000
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_chains_file() -> PathBuf {
    PathBuf::from("chains.txt")
}

fn default_results_file() -> PathBuf {
    PathBuf::from("results.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("server.log")
}

/// Number of generation workers when none is configured.
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A validated `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl FromStr for Address {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Address {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: Address,
    pub buffer_size: usize,
    pub max_connections: usize,
    pub log_file: PathBuf,
    pub console: bool,
}

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: Address,
    pub chains: u64,
    pub chunk_size: usize,
    pub workers: usize,
    pub chains_file: PathBuf,
    pub results_file: PathBuf,
    pub buffer_size: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Mode {
    Serve(ServerConfig),
    Send(ClientConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: Mode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

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
        let TomlConfig {
            server,
            client,
            logging,
        } = toml_config;

        let log_level = if cli.log_level != "info" {
            cli.log_level
        } else {
            logging.level
        };

        let mode = match cli.command {
            Command::Serve(args) => Mode::Serve(ServerConfig {
                listen: args.listen.unwrap_or(server.listen).parse()?,
                buffer_size: positive(
                    "buffer_size",
                    args.buffer_size.unwrap_or(server.buffer_size),
                )?,
                max_connections: positive(
                    "max_connections",
                    args.max_connections.unwrap_or(server.max_connections),
                )?,
                log_file: args.log_file.unwrap_or(logging.file),
                console: logging.console,
            }),
            Command::Send(args) => Mode::Send(ClientConfig {
                address: args.address.unwrap_or(client.address).parse()?,
                chains: positive("chains", args.chains.unwrap_or(client.chains))?,
                chunk_size: positive(
                    "chunk_size",
                    args.chunk_size.unwrap_or(client.chunk_size),
                )?,
                workers: positive(
                    "workers",
                    args.workers
                        .or(client.workers)
                        .unwrap_or_else(available_workers),
                )?,
                chains_file: args.chains_file.unwrap_or(client.chains_file),
                results_file: args.results_file.unwrap_or(client.results_file),
                buffer_size: positive(
                    "buffer_size",
                    args.buffer_size.unwrap_or(client.buffer_size),
                )?,
                seed: args.seed.or(client.seed),
            }),
        };

        Ok(Config { log_level, mode })
    }
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::NotPositive(name))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid socket address '{0}', expected host:port")]
    InvalidAddress(String),

    #[error("{0} must be a positive number")]
    NotPositive(&'static str),
}
