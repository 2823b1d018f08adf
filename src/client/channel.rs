use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;

use super::ClientConfig;
use crate::proto::watch_rpc_client::WatchRpcClient;
use crate::Error;
use crate::NetworkError;
use crate::Result;

/// Opens the shared channel every RPC of a client multiplexes over.
///
/// A single address is connected eagerly so a wrong address fails the build.
/// Several addresses are load balanced and connected on demand.
pub(crate) async fn create_channel(
    endpoints: &[String],
    config: &ClientConfig,
) -> Result<Channel> {
    if endpoints.is_empty() {
        return Err(NetworkError::EmptyEndpointList.into());
    }

    let mut targets = endpoints
        .iter()
        .map(|addr| build_endpoint(addr, config))
        .collect::<Result<Vec<_>>>()?;

    if targets.len() == 1 {
        let target = targets.remove(0);
        debug!(endpoint = %target.uri(), "Connecting watch client");
        return target
            .connect()
            .await
            .map_err(|e| Error::from(NetworkError::ServiceUnavailable(format!("{}: {}", endpoints[0], e))));
    }

    debug!(endpoints = ?endpoints, "Balancing watch client over endpoints");
    Ok(Channel::balance_list(targets.into_iter()))
}

fn build_endpoint(
    addr: &str,
    config: &ClientConfig,
) -> Result<Endpoint> {
    let endpoint = Endpoint::from_shared(addr.to_string())
        .map_err(|e| NetworkError::InvalidURI(format!("{addr}: {e}")))?;

    Ok(endpoint
        .connect_timeout(config.connect_timeout)
        .tcp_keepalive(Some(config.tcp_keepalive))
        .http2_keep_alive_interval(config.http2_keepalive_interval)
        .keep_alive_timeout(config.http2_keepalive_timeout)
        .keep_alive_while_idle(config.keep_alive_while_idle))
}

pub(crate) fn rpc_client(
    channel: Channel,
    config: &ClientConfig,
) -> WatchRpcClient<Channel> {
    let mut client = WatchRpcClient::new(channel).max_decoding_message_size(config.max_decoding_message_size);
    if config.enable_compression {
        client = client
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
    }
    client
}
