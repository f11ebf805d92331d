mod config;

pub use config::{ConfigError, StreamConfig};
