//! Watch server assembly: registry, broadcaster and gRPC service.
//!
//! ## Example
//! ```ignore
//! let shutdown = CancellationToken::new();
//! let server = WatchServer::builder(config, shutdown.clone())
//!     .event_source(my_source) // Optional override
//!     .build();
//! server.serve().await?;
//! ```

mod builder;
pub use builder::*;


use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::network::grpc::start_rpc_server;
use crate::network::grpc::WatchService;
use crate::Broadcaster;
use crate::EventSource;
use crate::IntervalEventSource;
use crate::Result;
use crate::WatchServerConfig;
use crate::WatcherRegistry;

pub struct WatchServer {
    config: WatchServerConfig,
    registry: Arc<WatcherRegistry>,
    service: Arc<WatchService>,
    event_source: Option<Box<dyn EventSource>>,
    /// Child of the caller's token; also cancelled when the server exits
    shutdown: CancellationToken,
}

impl WatchServer {
    pub fn builder(
        config: WatchServerConfig,
        shutdown: CancellationToken,
    ) -> WatchServerBuilder {
        WatchServerBuilder::new(config, shutdown)
    }

    pub fn registry(&self) -> Arc<WatcherRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &WatchServerConfig {
        &self.config
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.socket_addr()?).await?;
        self.serve_with_listener(listener).await
    }

    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
    ) -> Result<()> {
        let Self {
            config,
            registry,
            service,
            event_source,
            shutdown,
        } = self;

        let source = event_source.unwrap_or_else(|| -> Box<dyn EventSource> {
            Box::new(IntervalEventSource::new(
                config.watch.broadcast_interval(),
                config.watch.mock_endpoints.clone(),
                registry.clone(),
            ))
        });
        let broadcaster = tokio::spawn(Broadcaster::new(source, registry, shutdown.clone()).run());

        let result = start_rpc_server(service, listener, &config.server, shutdown.clone()).await;

        shutdown.cancel();
        if let Err(e) = broadcaster.await {
            debug!("broadcaster task ended abnormally: {:?}", e);
        }
        result
    }
}
