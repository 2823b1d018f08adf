use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::proto::Endpoint;
use crate::Error;
use crate::Result;

/// What the registry does when a create arrives for a watch id that another
/// session already holds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateWatchIdPolicy {
    /// Replace the existing registration; its session receives a `canceled`
    /// response.
    #[default]
    Overwrite,
    /// Refuse the new create with `created=false, canceled=true`.
    Reject,
}

/// Server-side watch session, registry and broadcaster settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each session's outbound response queue
    #[serde(default = "default_session_queue_size")]
    pub session_queue_size: usize,

    /// Tick of the interval event source (milliseconds)
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    /// Deliver updates only to watchers of the updated subject. When false,
    /// every watcher receives every update relabelled with its own subject.
    #[serde(default = "default_filter_by_subject")]
    pub filter_by_subject: bool,

    #[serde(default)]
    pub duplicate_watch_id_policy: DuplicateWatchIdPolicy,

    /// How long a closing session waits for queued responses to be written
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Upper bound on waiting for queue space to deliver a `canceled` response
    #[serde(default = "default_cancel_reserve_timeout_ms")]
    pub cancel_reserve_timeout_ms: u64,

    /// Endpoints published by the interval event source
    #[serde(default = "default_mock_endpoints")]
    pub mock_endpoints: Vec<Endpoint>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            session_queue_size: default_session_queue_size(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            filter_by_subject: default_filter_by_subject(),
            duplicate_watch_id_policy: DuplicateWatchIdPolicy::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
            cancel_reserve_timeout_ms: default_cancel_reserve_timeout_ms(),
            mock_endpoints: default_mock_endpoints(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session_queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.session_queue_size must be greater than 0".into(),
            )));
        }

        if self.broadcast_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.broadcast_interval_ms must be greater than 0".into(),
            )));
        }

        if self.drain_timeout_ms == 0 || self.cancel_reserve_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch drain and cancel timeouts must be greater than 0".into(),
            )));
        }

        if let Some(endpoint) = self.mock_endpoints.iter().find(|e| e.port.parse::<u16>().is_err()) {
            return Err(Error::Config(ConfigError::Message(format!(
                "watch.mock_endpoints contains invalid port: {endpoint}"
            ))));
        }

        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn cancel_reserve_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_reserve_timeout_ms)
    }
}

fn default_session_queue_size() -> usize {
    16
}
fn default_broadcast_interval_ms() -> u64 {
    2000
}
fn default_filter_by_subject() -> bool {
    true
}
fn default_drain_timeout_ms() -> u64 {
    500
}
fn default_cancel_reserve_timeout_ms() -> u64 {
    1000
}
fn default_mock_endpoints() -> Vec<Endpoint> {
    vec![Endpoint::new("127.0.0.1", "9090")]
}
