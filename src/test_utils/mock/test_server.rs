use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ChannelEventSource;
use crate::EndpointUpdate;
use crate::Result;
use crate::WatchConfig;
use crate::WatchServer;
use crate::WatchServerConfig;
use crate::WatcherRegistry;

/// A real watch server bound to `127.0.0.1:0`.
pub struct TestWatchServer {
    pub addr: SocketAddr,
    pub registry: Arc<WatcherRegistry>,
    pub updates: mpsc::Sender<EndpointUpdate>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<()>>,
}

impl TestWatchServer {
    pub async fn start(watch: WatchConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        Self::start_with_listener(listener, watch)
    }

    pub fn start_with_listener(
        listener: TcpListener,
        watch: WatchConfig,
    ) -> Self {
        let addr = listener.local_addr().expect("listener address");
        let config = WatchServerConfig {
            watch,
            ..WatchServerConfig::default()
        };
        let (updates, source) = ChannelEventSource::new(16);
        let shutdown = CancellationToken::new();
        let server = WatchServer::builder(config, shutdown.clone()).event_source(source).build();
        let registry = server.registry();
        let handle = tokio::spawn(server.serve_with_listener(listener));

        Self {
            addr,
            registry,
            updates,
            shutdown,
            handle,
        }
    }

    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn publish(
        &self,
        update: EndpointUpdate,
    ) {
        self.updates.send(update).await.expect("broadcaster stopped");
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}
