//! gRPC surface of the watch server: the `WatchRPC` service, the
//! per-connection session it spawns, and the server bootstrap.

mod grpc_watch_service;
mod watch_session;
pub use grpc_watch_service::*;
pub use watch_session::*;

#[cfg(test)]
mod grpc_watch_service_test;
#[cfg(test)]
mod watch_session_test;

//-------------------------------------------------------------------------------
// Start RPC Server
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic_health::server::health_reporter;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::proto::watch_rpc_server::WatchRpcServer;
use crate::NetworkError;
use crate::Result;
use crate::ServerConfig;

/// Serves the watch service (plus the standard health service) on `listener`
/// until `shutdown` is cancelled.
pub(crate) async fn start_rpc_server(
    service: Arc<WatchService>,
    listener: TcpListener,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let listen_address = listener.local_addr()?;

    // Create a HealthReporter to manage the health status
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter.set_serving::<WatchRpcServer<WatchService>>().await;

    let mut watch_service = WatchRpcServer::from_arc(service)
        .max_decoding_message_size(config.max_decoding_message_size)
        .max_encoding_message_size(config.max_encoding_message_size);
    if config.enable_compression {
        watch_service = watch_service
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip);
    }

    info!("Watch RPC server listening on {}", listen_address);

    let signal = shutdown.clone();
    if let Err(e) = tonic::transport::Server::builder()
        .tcp_nodelay(config.tcp_nodelay)
        .tcp_keepalive(config.tcp_keepalive())
        .http2_keepalive_interval(Some(config.http2_keep_alive_interval()))
        .http2_keepalive_timeout(Some(config.http2_keep_alive_timeout()))
        .max_concurrent_streams(config.max_concurrent_streams)
        .add_service(health_service)
        .add_service(watch_service)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            signal.cancelled().await;
            warn!("Stopping watch RPC server. {}", listen_address);
        })
        .await
    {
        error!("error to start watch rpc server :{:?}.", e);
        return Err(NetworkError::ServiceUnavailable(format!("watch rpc server on {listen_address}: {e}")).into());
    }

    health_reporter.set_not_serving::<WatchRpcServer<WatchService>>().await;
    debug!("watch rpc service finished!");
    Ok(())
}
