use std::sync::Arc;
use std::time::Duration;

use super::channel::create_channel;
use super::AppServerClient;
use super::Client;
use super::ClientConfig;
use super::GrpcWatchTransport;
use super::Watcher;
use crate::Result;

pub struct ClientBuilder {
    config: ClientConfig,
    endpoints: Vec<String>,
}

impl ClientBuilder {
    /// Create a new builder with default config and specified endpoints
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            config: ClientConfig::default(),
            endpoints,
        }
    }

    /// Set connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set unary request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enable/disable compression (default: enabled)
    pub fn enable_compression(
        mut self,
        enable: bool,
    ) -> Self {
        self.config.enable_compression = enable;
        self
    }

    /// Reconnect backoff of watch streams (default: 1ms growing to 2s)
    pub fn watch_backoff(
        mut self,
        base: Duration,
        max: Duration,
    ) -> Self {
        self.config.watch_backoff_base = base;
        self.config.watch_backoff_max = max;
        self
    }

    /// How long a closing watch waits for the server to confirm its cancel
    /// (default: 1s)
    pub fn cancel_linger(
        mut self,
        linger: Duration,
    ) -> Self {
        self.config.cancel_linger = linger;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// # Warning: Configuration Override
    /// This will discard all previous settings configured through individual
    /// methods like [`connect_timeout`](ClientBuilder::connect_timeout) or
    /// [`watch_backoff`](ClientBuilder::watch_backoff).
    ///
    /// # Example: Full Configuration
    /// ```ignore
    /// use grpcwatch::{ClientBuilder, ClientConfig};
    /// use std::time::Duration;
    ///
    /// let custom_config = ClientConfig {
    ///     connect_timeout: Duration::from_secs(2),
    ///     cancel_linger: Duration::from_millis(200),
    ///     ..ClientConfig::default()
    /// };
    ///
    /// let builder = ClientBuilder::new(vec!["http://127.0.0.1:5853".into()])
    ///     .set_config(custom_config);
    /// ```
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Build the client with current configuration
    ///
    /// # Errors
    /// - [`NetworkError::EmptyEndpointList`](crate::NetworkError) without endpoints
    /// - [`NetworkError::InvalidURI`](crate::NetworkError) for a malformed address
    /// - [`NetworkError::ServiceUnavailable`](crate::NetworkError) when a
    ///   single endpoint cannot be reached
    pub async fn build(self) -> Result<Client> {
        let channel = create_channel(&self.endpoints, &self.config).await?;
        let transport = Arc::new(GrpcWatchTransport::new(channel.clone(), &self.config));

        Ok(Client {
            watcher: Arc::new(Watcher::new(transport, self.config.clone())),
            app_servers: AppServerClient::new(channel, &self.config),
        })
    }
}
