use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for the daily rolling log file; stdout only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level).map_err(|e| {
            Error::Config(ConfigError::Message(format!("invalid log.level {:?}: {}", self.level, e)))
        })?;
        Ok(())
    }
}

fn default_level() -> String {
    "info".to_string()
}
