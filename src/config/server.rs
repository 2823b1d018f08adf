use std::net::SocketAddr;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// gRPC server listener and HTTP/2 transport parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// TCP keepalive in seconds (0 to disable)
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// HTTP2 keepalive ping interval in seconds
    #[serde(default = "default_h2_keepalive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// HTTP2 keepalive timeout in seconds
    #[serde(default = "default_h2_keepalive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,

    /// HTTP2 SETTINGS_MAX_CONCURRENT_STREAMS
    #[serde(default = "default_max_streams")]
    pub max_concurrent_streams: u32,

    #[serde(default = "default_max_message_size")]
    pub max_decoding_message_size: usize,

    #[serde(default = "default_max_message_size")]
    pub max_encoding_message_size: usize,

    /// Accept and send gzip-compressed messages
    #[serde(default = "default_enable_compression")]
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            tcp_nodelay: default_tcp_nodelay(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keepalive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keepalive_timeout(),
            max_concurrent_streams: default_max_streams(),
            max_decoding_message_size: default_max_message_size(),
            max_encoding_message_size: default_max_message_size(),
            enable_compression: default_enable_compression(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.http2_keep_alive_timeout_in_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "server.http2_keep_alive_timeout_in_secs must be greater than 0".into(),
            )));
        }

        if self.http2_keep_alive_interval_in_secs <= self.http2_keep_alive_timeout_in_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "server.http2_keep_alive_interval_in_secs ({}) must exceed http2_keep_alive_timeout_in_secs ({})",
                self.http2_keep_alive_interval_in_secs, self.http2_keep_alive_timeout_in_secs
            ))));
        }

        if self.max_concurrent_streams == 0 {
            return Err(Error::Config(ConfigError::Message(
                "server.max_concurrent_streams must be greater than 0".into(),
            )));
        }

        if self.max_decoding_message_size < 1024 || self.max_encoding_message_size < 1024 {
            return Err(Error::Config(ConfigError::Message(
                "server message size limits must be at least 1024 bytes".into(),
            )));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_address, self.port).parse().map_err(|e| {
            Error::Config(ConfigError::Message(format!(
                "invalid listen address {}:{}: {}",
                self.listen_address, self.port, e
            )))
        })
    }

    pub fn tcp_keepalive(&self) -> Option<Duration> {
        match self.tcp_keepalive_in_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn http2_keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.http2_keep_alive_interval_in_secs)
    }

    pub fn http2_keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.http2_keep_alive_timeout_in_secs)
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5853
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_tcp_keepalive() -> u64 {
    3600
}
fn default_h2_keepalive_interval() -> u64 {
    15
}
fn default_h2_keepalive_timeout() -> u64 {
    5
}
fn default_max_streams() -> u32 {
    1024
}
fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}
fn default_enable_compression() -> bool {
    true
}
