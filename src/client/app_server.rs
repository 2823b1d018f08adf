use std::time::Duration;

use tonic::transport::Channel;
use tracing::debug;

use super::channel::rpc_client;
use super::ClientConfig;
use crate::proto::watch_rpc_client::WatchRpcClient;
use crate::proto::GetAppServersResponse;
use crate::proto::Subject;
use crate::Result;

/// Unary lookup of a subject's current endpoints.
#[derive(Clone, Debug)]
pub struct AppServerClient {
    client: WatchRpcClient<Channel>,
    request_timeout: Duration,
}

impl AppServerClient {
    pub(crate) fn new(
        channel: Channel,
        config: &ClientConfig,
    ) -> Self {
        Self {
            client: rpc_client(channel, config),
            request_timeout: config.request_timeout,
        }
    }

    /// Fetches the endpoints the server last published for `subject`.
    ///
    /// # Errors
    /// Returns [`NetworkError::TonicStatusError`](crate::NetworkError) when
    /// the call fails or exceeds the configured request timeout.
    pub async fn get_app_servers(
        &self,
        subject: Subject,
    ) -> Result<GetAppServersResponse> {
        let mut request = tonic::Request::new(subject);
        request.set_timeout(self.request_timeout);

        let mut client = self.client.clone();
        let response = client.get_app_servers(request).await?.into_inner();
        debug!(
            subject = ?response.subject,
            endpoints = response.endpoints.len(),
            "Fetched app servers"
        );
        Ok(response)
    }
}
