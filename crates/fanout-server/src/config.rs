//! Server configuration
//!
//! Layered as: built-in defaults, then the optional config file, then
//! `FANOUT__*` environment variables, then command line flags.

use fanout_core::{FanoutConfig, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};

/// Where published events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Newline-delimited JSON on standard input
    #[default]
    Stdin,
    /// A periodic sequence-numbered tick
    Ticker,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Route serving the event stream
    #[serde(default = "default_path")]
    pub path: String,

    /// Per-subscriber queue capacity, in frames
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Event source feeding the broadcaster
    #[serde(default)]
    pub source: SourceKind,

    /// Tick period for the ticker source
    #[serde(default = "default_ticker_interval")]
    pub ticker_interval_ms: u64,

    /// Capacity of the channel between the source and the broadcaster
    #[serde(default = "default_source_capacity")]
    pub source_capacity: usize,
}

impl AppConfig {
    /// Load configuration from file, environment and CLI overrides
    pub fn load(config_path: &str, cli: &crate::Cli) -> anyhow::Result<Self> {
        let mut config: AppConfig = ::config::Config::builder()
            .add_source(::config::File::with_name(config_path).required(false))
            .add_source(
                ::config::Environment::with_prefix("FANOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        // Apply CLI overrides
        if let Some(listen) = &cli.listen {
            config.listen = listen.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(buffer_size) = cli.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(source) = cli.source {
            config.source = source;
        }

        config.validate()?;
        Ok(config)
    }

    /// Options for the core broadcaster
    pub fn fanout(&self) -> FanoutConfig {
        FanoutConfig::default().with_buffer_size(self.buffer_size)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.fanout().validate()?;

        if !self.path.starts_with('/') {
            anyhow::bail!("path must start with '/', got {:?}", self.path);
        }
        if self.source_capacity == 0 {
            anyhow::bail!("source_capacity must be at least 1");
        }
        if self.source == SourceKind::Ticker && self.ticker_interval_ms == 0 {
            anyhow::bail!("ticker_interval_ms must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            path: default_path(),
            buffer_size: default_buffer_size(),
            source: SourceKind::default(),
            ticker_interval_ms: default_ticker_interval(),
            source_capacity: default_source_capacity(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_path() -> String {
    "/events".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_ticker_interval() -> u64 {
    1000
}

fn default_source_capacity() -> usize {
    1024
}
