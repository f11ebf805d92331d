use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    #[serde(default = "defaults::segment_name")]
    pub segment_name: String,
    #[serde(default = "defaults::capacity")]
    pub capacity: u64,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
    #[serde(default)]
    pub shm_dir: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive for whoever installs the
    /// subscriber; the library crates only emit events.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    pub fn segment_name() -> String {
        "basalt_stream".into()
    }

    pub fn capacity() -> u64 {
        1 << 16 // 65536
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            segment_name: defaults::segment_name(),
            capacity: defaults::capacity(),
            read_timeout_ms: None,
            write_timeout_ms: None,
            shm_dir: None,
            log_level: defaults::log_level(),
        }
    }
}

impl StreamConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: StreamConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_name.is_empty() {
            return Err(ConfigError::Invalid("segment_name must not be empty"));
        }
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1"));
        }
        Ok(())
    }

    /// Total read timeout; `None` waits forever.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Total write timeout; `None` waits forever.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}
