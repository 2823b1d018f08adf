use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tonic::Status;

use super::*;
use crate::proto::Endpoint;
use crate::proto::Subject;
use crate::proto::WatchRequest;
use crate::proto::WatchResponse;
use crate::test_utils::enable_logger;
use crate::DuplicateWatchIdPolicy;
use crate::EndpointUpdate;
use crate::WatchConfig;
use crate::WatcherRegistry;

struct SessionHarness {
    session_id: String,
    requests: mpsc::Sender<std::result::Result<WatchRequest, Status>>,
    responses: mpsc::Receiver<std::result::Result<WatchResponse, Status>>,
    shutdown: CancellationToken,
    handle: JoinHandle<SessionEnd>,
}

impl SessionHarness {
    async fn next(&mut self) -> Option<std::result::Result<WatchResponse, Status>> {
        tokio::time::timeout(Duration::from_secs(2), self.responses.recv())
            .await
            .expect("timed out waiting for a watch response")
    }

    async fn next_ok(&mut self) -> WatchResponse {
        self.next().await.expect("stream ended").expect("unexpected status")
    }

    async fn finish(self) -> SessionEnd {
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("session did not end")
            .unwrap()
    }
}

fn spawn_session(registry: &Arc<WatcherRegistry>) -> SessionHarness {
    let (requests, inbound) = mpsc::channel(16);
    let (transport, responses) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let session = ServerWatchSession::new(
        registry.clone(),
        ReceiverStream::new(inbound).boxed(),
        transport,
        &WatchConfig::default(),
        shutdown.child_token(),
    );
    let session_id = session.session_id().to_string();
    let handle = tokio::spawn(session.run());
    SessionHarness {
        session_id,
        requests,
        responses,
        shutdown,
        handle,
    }
}

fn subject() -> Subject {
    Subject::new("watchertest", "qa")
}

fn default_registry() -> Arc<WatcherRegistry> {
    Arc::new(WatcherRegistry::new(&WatchConfig::default()))
}

#[tokio::test]
async fn test_create_registers_and_confirms() {
    enable_logger();
    let registry = default_registry();
    let mut session = spawn_session(&registry);

    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();

    let created = session.next_ok().await;
    assert!(created.created);
    assert_eq!(created.subject, Some(subject()));
    assert_eq!(registry.owner("w1"), Some(session.session_id.clone()));
}

#[tokio::test]
async fn test_broadcast_reaches_session_after_created() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(session.next_ok().await.created);

    let endpoints = vec![Endpoint::new("127.0.0.1", "9090")];
    registry.broadcast(&EndpointUpdate::new(subject(), endpoints.clone()));

    let update = session.next_ok().await;
    assert!(update.is_update());
    assert_eq!(update.endpoints, endpoints);
}

#[tokio::test]
async fn test_multiple_watch_ids_share_one_session() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    session
        .requests
        .send(Ok(WatchRequest::create("w2", Subject::new("billing", "qa"))))
        .await
        .unwrap();

    assert!(session.next_ok().await.created);
    assert!(session.next_ok().await.created);
    assert_eq!(registry.len(), 2);

    drop(session.requests);
    let mut rest = Vec::new();
    while let Some(item) = session.responses.recv().await {
        rest.push(item.unwrap());
    }
    assert_eq!(rest.iter().filter(|r| r.canceled).count(), 2);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_cancel_sends_canceled_and_ends_session() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(session.next_ok().await.created);

    session.requests.send(Ok(WatchRequest::cancel("w1"))).await.unwrap();

    let canceled = session.next_ok().await;
    assert!(canceled.canceled);
    assert_eq!(canceled.cancel_reason, CLIENT_STOP_REASON);
    assert!(session.next().await.is_none());
    assert!(registry.is_empty());
    assert_eq!(session.finish().await, SessionEnd::ClientCanceled);
}

#[tokio::test]
async fn test_client_eof_releases_watches() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(session.next_ok().await.created);

    let SessionHarness {
        requests,
        mut responses,
        handle,
        ..
    } = session;
    drop(requests);

    let canceled = responses.recv().await.unwrap().unwrap();
    assert!(canceled.canceled);
    assert_eq!(canceled.cancel_reason, SESSION_CLOSED_REASON);
    assert!(responses.recv().await.is_none());
    assert_eq!(handle.await.unwrap(), SessionEnd::ClientClosed);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_client_disconnect_releases_watches() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(session.next_ok().await.created);

    let SessionHarness {
        requests,
        responses,
        handle,
        ..
    } = session;
    drop(responses);

    let end = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::Disconnected);
    assert!(registry.is_empty());
    drop(requests);
}

#[tokio::test]
async fn test_inbound_error_ends_session() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(session.next_ok().await.created);

    session.requests.send(Err(Status::internal("broken pipe"))).await.unwrap();

    assert!(session.next_ok().await.canceled);
    assert!(registry.is_empty());
    assert_eq!(session.finish().await, SessionEnd::InboundError);
}

#[tokio::test]
async fn test_empty_request_ends_session() {
    let registry = default_registry();
    let session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::default())).await.unwrap();
    assert_eq!(session.finish().await, SessionEnd::InvalidRequest);
}

#[tokio::test]
async fn test_server_shutdown_ends_with_unavailable_and_no_cancel() {
    let registry = default_registry();
    let mut session = spawn_session(&registry);
    session.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(session.next_ok().await.created);

    session.shutdown.cancel();

    let status = session.next().await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert!(session.next().await.is_none());
    assert!(registry.is_empty());
    assert_eq!(session.finish().await, SessionEnd::ServerShutdown);
}

#[tokio::test]
async fn test_teardown_keeps_watch_taken_over_by_other_session() {
    let registry = default_registry();
    let mut first = spawn_session(&registry);
    let mut second = spawn_session(&registry);

    first.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(first.next_ok().await.created);
    second.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(second.next_ok().await.created);

    let taken_over = first.next_ok().await;
    assert!(taken_over.canceled);

    let SessionHarness { requests, handle, .. } = first;
    drop(requests);
    assert_eq!(handle.await.unwrap(), SessionEnd::ClientClosed);

    assert_eq!(registry.owner("w1"), Some(second.session_id.clone()));
}

#[tokio::test]
async fn test_duplicate_watch_id_rejected_under_reject_policy() {
    let registry = Arc::new(WatcherRegistry::new(&WatchConfig {
        duplicate_watch_id_policy: DuplicateWatchIdPolicy::Reject,
        ..Default::default()
    }));
    let mut first = spawn_session(&registry);
    let mut second = spawn_session(&registry);

    first.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    assert!(first.next_ok().await.created);

    second.requests.send(Ok(WatchRequest::create("w1", subject()))).await.unwrap();
    let rejected = second.next_ok().await;
    assert!(!rejected.created);
    assert!(rejected.canceled);
    assert_eq!(rejected.cancel_reason, DUPLICATE_WATCH_ID_REASON);

    // The rejected session must not release the other session's watch
    let SessionHarness { requests, handle, .. } = second;
    drop(requests);
    handle.await.unwrap();
    assert_eq!(registry.owner("w1"), Some(first.session_id.clone()));
}

#[test]
fn test_is_client_ctx_err() {
    assert!(is_client_ctx_err(&Status::cancelled("context canceled")));
    assert!(is_client_ctx_err(&Status::deadline_exceeded("context deadline exceeded")));
    assert!(is_client_ctx_err(&Status::unavailable("client disconnected")));
    assert!(is_client_ctx_err(&Status::unavailable("stream error: stream ID 21; CANCEL")));
    assert!(is_client_ctx_err(&Status::unknown("h2 protocol error: stream no longer needed")));

    assert!(!is_client_ctx_err(&Status::unavailable("connection refused")));
    assert!(!is_client_ctx_err(&Status::internal("boom")));
    assert!(!is_client_ctx_err(&Status::permission_denied("nope")));
}
