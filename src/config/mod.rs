//! Configuration management for the watch server.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`GRPCWATCH__SECTION__KEY`)
//! - Component-wise validation
mod log;
mod monitoring;
mod server;
mod watch;
pub use log::*;
pub use monitoring::*;
pub use server::*;
pub use watch::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub(crate) const ENV_PREFIX: &str = "GRPCWATCH";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WatchServerConfig {
    /// gRPC listener and transport tuning
    #[serde(default)]
    pub server: ServerConfig,
    /// Watch sessions, registry and broadcaster
    #[serde(default)]
    pub watch: WatchConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl WatchServerConfig {
    /// Loads defaults, then the file named by `CONFIG_PATH` (if set), then
    /// `GRPCWATCH__*` environment variables.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.watch.validate()?;
        self.monitoring.validate()?;
        self.log.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
