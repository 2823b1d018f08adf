use std::net::SocketAddr;
use std::time::Duration;

use grpcwatch::ChannelEventSource;
use grpcwatch::Client;
use grpcwatch::ClientConfig;
use grpcwatch::EndpointUpdate;
use grpcwatch::Result;
use grpcwatch::WatchConfig;
use grpcwatch::WatchResponse;
use grpcwatch::WatchResponseReceiver;
use grpcwatch::WatchServer;
use grpcwatch::WatchServerConfig;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const WAIT_FOR_RESPONSE: Duration = Duration::from_secs(5);

pub struct RunningServer {
    pub addr: SocketAddr,
    pub updates: mpsc::Sender<EndpointUpdate>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<()>>,
}

impl RunningServer {
    pub fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(WAIT_FOR_RESPONSE, self.handle).await;
    }
}

pub fn watch_config() -> WatchConfig {
    WatchConfig {
        drain_timeout_ms: 100,
        cancel_reserve_timeout_ms: 100,
        ..WatchConfig::default()
    }
}

pub async fn start_server(addr: &str) -> RunningServer {
    let listener = TcpListener::bind(addr).await.expect("bind watch server");
    let addr = listener.local_addr().expect("local addr");
    let config = WatchServerConfig {
        watch: watch_config(),
        ..WatchServerConfig::default()
    };

    let (updates, source) = ChannelEventSource::new(16);
    let shutdown = CancellationToken::new();
    let server = WatchServer::builder(config, shutdown.clone()).event_source(source).build();
    let handle = tokio::spawn(server.serve_with_listener(listener));

    RunningServer {
        addr,
        updates,
        shutdown,
        handle,
    }
}

pub async fn connect(uri: String) -> Client {
    let config = ClientConfig {
        watch_backoff_max: Duration::from_millis(50),
        cancel_linger: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    Client::builder(vec![uri]).set_config(config).build().await.expect("client connects")
}

pub async fn recv(receiver: &mut WatchResponseReceiver) -> Option<WatchResponse> {
    tokio::time::timeout(WAIT_FOR_RESPONSE, receiver.recv())
        .await
        .expect("timed out waiting for a watch response")
}
