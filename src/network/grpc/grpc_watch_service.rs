//! Implementation of the `watchpb.WatchRPC` service.
//!
//! Every accepted `Watch` call gets its own [`ServerWatchSession`]; the
//! response stream handed to tonic is the session's transport queue.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic::Streaming;
use tracing::debug;

use super::ServerWatchSession;
use crate::proto::watch_rpc_server::WatchRpc;
use crate::proto::GetAppServersResponse;
use crate::proto::Subject;
use crate::proto::WatchRequest;
use crate::proto::WatchResponse;
use crate::WatchConfig;
use crate::WatcherRegistry;

pub struct WatchService {
    registry: Arc<WatcherRegistry>,
    config: WatchConfig,
    shutdown: CancellationToken,
}

impl WatchService {
    pub fn new(
        registry: Arc<WatcherRegistry>,
        config: WatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<WatcherRegistry> {
        &self.registry
    }
}

#[tonic::async_trait]
impl WatchRpc for WatchService {
    async fn get_app_servers(
        &self,
        request: Request<Subject>,
    ) -> std::result::Result<Response<GetAppServersResponse>, Status> {
        let subject = request.into_inner();
        let endpoints = self.registry.snapshot(&subject);
        debug!(subject = %subject, endpoints = endpoints.len(), "GetAppServers");

        Ok(Response::new(GetAppServersResponse {
            subject: Some(subject),
            endpoints,
        }))
    }

    type WatchStream = ReceiverStream<std::result::Result<WatchResponse, Status>>;

    async fn watch(
        &self,
        request: Request<Streaming<WatchRequest>>,
    ) -> std::result::Result<Response<Self::WatchStream>, Status> {
        if self.shutdown.is_cancelled() {
            return Err(Status::unavailable("Watch server is shutting down"));
        }

        let inbound = request.into_inner().boxed();
        let (transport, responses) = mpsc::channel(self.config.session_queue_size);
        let session = ServerWatchSession::new(
            self.registry.clone(),
            inbound,
            transport,
            &self.config,
            self.shutdown.child_token(),
        );
        debug!(session_id = %session.session_id(), "Watch stream accepted");
        tokio::spawn(session.run());

        Ok(Response::new(ReceiverStream::new(responses)))
    }
}
