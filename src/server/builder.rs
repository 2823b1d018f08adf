use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::WatchServer;
use crate::network::grpc::WatchService;
use crate::EventSource;
use crate::WatchServerConfig;
use crate::WatcherRegistry;

/// Assembles a [`WatchServer`]. Without an explicit event source the server
/// publishes `watch.mock_endpoints` every `watch.broadcast_interval_ms`.
pub struct WatchServerBuilder {
    config: WatchServerConfig,
    shutdown: CancellationToken,
    event_source: Option<Box<dyn EventSource>>,
}

impl WatchServerBuilder {
    pub fn new(
        config: WatchServerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            shutdown,
            event_source: None,
        }
    }

    /// Sets a custom source of endpoint updates
    pub fn event_source(
        mut self,
        source: impl EventSource,
    ) -> Self {
        self.event_source = Some(Box::new(source));
        self
    }

    pub fn build(self) -> WatchServer {
        let shutdown = self.shutdown.child_token();
        let registry = Arc::new(WatcherRegistry::new(&self.config.watch));
        let service = Arc::new(WatchService::new(
            registry.clone(),
            self.config.watch.clone(),
            shutdown.clone(),
        ));

        WatchServer {
            config: self.config,
            registry,
            service,
            event_source: self.event_source,
            shutdown,
        }
    }
}
