//! Physical watch streams.
//!
//! A [`WatchTransport`] opens one bidirectional `Watch` call per invocation.
//! Reconnecting means calling `open` again, so everything above this seam is
//! independent of tonic.

use futures::stream::BoxStream;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::Status;

use super::channel::rpc_client;
use super::error::normalize_transport_status;
use super::ClientConfig;
use crate::proto::watch_rpc_client::WatchRpcClient;
use crate::proto::WatchRequest;
use crate::proto::WatchResponse;

/// Both directions of one open `Watch` call.
///
/// Dropping `requests` half-closes the call.
pub struct WatchChannel {
    pub requests: mpsc::Sender<WatchRequest>,
    pub responses: BoxStream<'static, Result<WatchResponse, Status>>,
}

impl std::fmt::Debug for WatchChannel {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchChannel")
            .field("requests_closed", &self.requests.is_closed())
            .finish()
    }
}

#[cfg_attr(test, automock)]
#[tonic::async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Opens a new physical stream.
    async fn open(&self) -> Result<WatchChannel, Status>;
}

#[derive(Clone, Debug)]
pub struct GrpcWatchTransport {
    client: WatchRpcClient<Channel>,
    request_buffer_size: usize,
}

impl GrpcWatchTransport {
    pub fn new(
        channel: Channel,
        config: &ClientConfig,
    ) -> Self {
        Self {
            client: rpc_client(channel, config),
            request_buffer_size: config.request_buffer_size,
        }
    }
}

#[tonic::async_trait]
impl WatchTransport for GrpcWatchTransport {
    async fn open(&self) -> Result<WatchChannel, Status> {
        let (requests, outbound) = mpsc::channel(self.request_buffer_size);
        let mut client = self.client.clone();
        let response = client
            .watch(ReceiverStream::new(outbound))
            .await
            .map_err(normalize_transport_status)?;

        let responses = response
            .into_inner()
            .map(|item| item.map_err(normalize_transport_status))
            .boxed();

        Ok(WatchChannel { requests, responses })
    }
}
