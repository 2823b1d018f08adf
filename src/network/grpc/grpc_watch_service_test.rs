use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::CLIENT_STOP_REASON;
use super::DUPLICATE_WATCH_ID_REASON;
use crate::proto::Subject;
use crate::proto::WatchResponse;
use crate::test_utils::enable_logger;
use crate::test_utils::endpoints;
use crate::test_utils::fast_client_config;
use crate::test_utils::fast_watch_config;
use crate::test_utils::TestWatchServer;
use crate::Client;
use crate::DuplicateWatchIdPolicy;
use crate::EndpointUpdate;
use crate::WatchConfig;
use crate::WatchResponseReceiver;

async fn connect(server: &TestWatchServer) -> Client {
    Client::builder(vec![server.uri()])
        .set_config(fast_client_config())
        .build()
        .await
        .expect("client should connect")
}

async fn recv(receiver: &mut WatchResponseReceiver) -> Option<WatchResponse> {
    tokio::time::timeout(Duration::from_secs(3), receiver.recv())
        .await
        .expect("timed out waiting for a watch response")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn subject() -> Subject {
    Subject::new("watchertest", "qa")
}

#[tokio::test]
async fn test_get_app_servers_returns_last_published_endpoints() {
    enable_logger();
    let server = TestWatchServer::start(fast_watch_config()).await;
    let client = connect(&server).await;

    let empty = client.app_servers().get_app_servers(subject()).await.unwrap();
    assert_eq!(empty.subject, Some(subject()));
    assert!(empty.endpoints.is_empty());

    server.publish(EndpointUpdate::new(subject(), endpoints(&[8080, 8081]))).await;
    let registry = server.registry.clone();
    wait_until(|| !registry.snapshot(&subject()).is_empty()).await;

    let response = client.app_servers().get_app_servers(subject()).await.unwrap();
    assert_eq!(response.endpoints, endpoints(&[8080, 8081]));

    server.stop().await;
}

#[tokio::test]
async fn test_watch_create_update_cancel_over_grpc() {
    enable_logger();
    let server = TestWatchServer::start(fast_watch_config()).await;
    let client = connect(&server).await;
    let ctx = CancellationToken::new();

    let mut responses = client.watcher().watch(&ctx, "watchertest", subject()).await;
    let created = recv(&mut responses).await.unwrap();
    assert!(created.created);
    assert_eq!(created.subject, Some(subject()));
    assert!(server.registry.contains("watchertest"));

    server.publish(EndpointUpdate::new(subject(), endpoints(&[9090]))).await;
    let update = recv(&mut responses).await.unwrap();
    assert!(update.is_update());
    assert_eq!(update.endpoints, endpoints(&[9090]));

    // Other subjects are filtered out
    server
        .publish(EndpointUpdate::new(Subject::new("other", "qa"), endpoints(&[1])))
        .await;
    server.publish(EndpointUpdate::new(subject(), endpoints(&[9091]))).await;
    assert_eq!(recv(&mut responses).await.unwrap().endpoints, endpoints(&[9091]));

    client.watcher().close_stream("watchertest");
    let canceled = recv(&mut responses).await.unwrap();
    assert!(canceled.canceled);
    assert_eq!(canceled.cancel_reason, CLIENT_STOP_REASON);
    assert!(recv(&mut responses).await.is_none());

    let registry = server.registry.clone();
    wait_until(|| registry.is_empty()).await;
    server.stop().await;
}

#[tokio::test]
async fn test_created_carries_current_snapshot() {
    enable_logger();
    let server = TestWatchServer::start(fast_watch_config()).await;
    server.publish(EndpointUpdate::new(subject(), endpoints(&[7000]))).await;
    let registry = server.registry.clone();
    wait_until(|| !registry.snapshot(&subject()).is_empty()).await;

    let client = connect(&server).await;
    let ctx = CancellationToken::new();
    let mut responses = client.watcher().watch(&ctx, "w", subject()).await;

    let created = recv(&mut responses).await.unwrap();
    assert!(created.created);
    assert_eq!(created.endpoints, endpoints(&[7000]));

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_watch_id_rejected_across_connections() {
    enable_logger();
    let server = TestWatchServer::start(WatchConfig {
        duplicate_watch_id_policy: DuplicateWatchIdPolicy::Reject,
        ..fast_watch_config()
    })
    .await;
    let first_client = connect(&server).await;
    let second_client = connect(&server).await;
    let ctx = CancellationToken::new();

    let mut first = first_client.watcher().watch(&ctx, "shared", subject()).await;
    assert!(recv(&mut first).await.unwrap().created);

    let mut second = second_client.watcher().watch(&ctx, "shared", subject()).await;
    let rejected = recv(&mut second).await.unwrap();
    assert!(!rejected.created);
    assert!(rejected.canceled);
    assert_eq!(rejected.cancel_reason, DUPLICATE_WATCH_ID_REASON);
    assert!(recv(&mut second).await.is_none());

    // The first owner keeps receiving updates
    server.publish(EndpointUpdate::new(subject(), endpoints(&[1]))).await;
    assert!(recv(&mut first).await.unwrap().is_update());

    server.stop().await;
}

#[tokio::test]
async fn test_watch_id_takeover_cancels_previous_owner() {
    enable_logger();
    let server = TestWatchServer::start(fast_watch_config()).await;
    let first_client = connect(&server).await;
    let second_client = connect(&server).await;
    let ctx = CancellationToken::new();

    let mut first = first_client.watcher().watch(&ctx, "shared", subject()).await;
    assert!(recv(&mut first).await.unwrap().created);

    let mut second = second_client.watcher().watch(&ctx, "shared", subject()).await;
    assert!(recv(&mut second).await.unwrap().created);

    let taken_over = recv(&mut first).await.unwrap();
    assert!(taken_over.canceled);
    assert!(recv(&mut first).await.is_none());

    server.publish(EndpointUpdate::new(subject(), endpoints(&[2]))).await;
    assert!(recv(&mut second).await.unwrap().is_update());

    server.stop().await;
}
