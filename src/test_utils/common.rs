use std::time::Duration;

use crate::proto::Endpoint;
use crate::ClientConfig;
use crate::WatchConfig;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Client settings with short timers so failure paths finish quickly.
pub(crate) fn fast_client_config() -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(500),
        watch_backoff_base: Duration::from_millis(1),
        watch_backoff_max: Duration::from_millis(20),
        cancel_linger: Duration::from_millis(100),
        ..ClientConfig::default()
    }
}

pub(crate) fn fast_watch_config() -> WatchConfig {
    WatchConfig {
        broadcast_interval_ms: 50,
        drain_timeout_ms: 100,
        cancel_reserve_timeout_ms: 100,
        ..WatchConfig::default()
    }
}

pub(crate) fn endpoints(ports: &[u32]) -> Vec<Endpoint> {
    ports.iter().map(|port| Endpoint::new("10.0.0.1", port.to_string())).collect()
}
