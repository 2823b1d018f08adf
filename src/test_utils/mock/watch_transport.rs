use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::proto::watch_request::RequestUnion;
use crate::proto::WatchCancelRequest;
use crate::proto::WatchCreateRequest;
use crate::proto::WatchRequest;
use crate::proto::WatchResponse;
use crate::WatchChannel;
use crate::WatchTransport;

const PEER_WAIT: Duration = Duration::from_secs(2);

/// Server side of one physical stream opened through [`ScriptedTransport`].
pub struct MockWatchPeer {
    pub requests: mpsc::Receiver<WatchRequest>,
    pub responses: mpsc::Sender<Result<WatchResponse, Status>>,
}

impl MockWatchPeer {
    pub async fn next_request(&mut self) -> Option<WatchRequest> {
        tokio::time::timeout(PEER_WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a watch request")
    }

    pub async fn expect_create(&mut self) -> WatchCreateRequest {
        match self.next_request().await.and_then(|r| r.request_union) {
            Some(RequestUnion::CreateRequest(create)) => create,
            other => panic!("expected create request, got {:?}", other),
        }
    }

    pub async fn expect_cancel(&mut self) -> WatchCancelRequest {
        match self.next_request().await.and_then(|r| r.request_union) {
            Some(RequestUnion::CancelRequest(cancel)) => cancel,
            other => panic!("expected cancel request, got {:?}", other),
        }
    }

    pub async fn respond(
        &self,
        response: WatchResponse,
    ) {
        self.responses.send(Ok(response)).await.expect("watch stream dropped");
    }

    pub async fn fail(
        &self,
        status: Status,
    ) {
        let _ = self.responses.send(Err(status)).await;
    }
}

/// Transport whose `open` outcomes are scripted by the test.
///
/// Queued failures are returned first, in order; once the queue is empty
/// every `open` succeeds and publishes a new [`MockWatchPeer`].
pub struct ScriptedTransport {
    failures: Mutex<VecDeque<Status>>,
    peers: mpsc::UnboundedSender<MockWatchPeer>,
    opens: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, PeerQueue) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            failures: Mutex::new(VecDeque::new()),
            peers,
            opens: AtomicUsize::new(0),
        });
        (transport, PeerQueue { rx })
    }

    pub fn fail_next(
        &self,
        status: Status,
    ) {
        self.failures.lock().push_back(status);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[tonic::async_trait]
impl WatchTransport for ScriptedTransport {
    async fn open(&self) -> Result<WatchChannel, Status> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.failures.lock().pop_front() {
            return Err(status);
        }

        let (requests, request_rx) = mpsc::channel(16);
        let (response_tx, responses) = mpsc::channel(16);
        let _ = self.peers.send(MockWatchPeer {
            requests: request_rx,
            responses: response_tx,
        });
        Ok(WatchChannel {
            requests,
            responses: ReceiverStream::new(responses).boxed(),
        })
    }
}

/// Physical streams opened so far, in order.
pub struct PeerQueue {
    rx: mpsc::UnboundedReceiver<MockWatchPeer>,
}

impl PeerQueue {
    pub async fn next(&mut self) -> MockWatchPeer {
        tokio::time::timeout(PEER_WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a stream to open")
            .expect("transport dropped")
    }

    /// Asserts no further stream opens within `wait`.
    pub async fn assert_idle(
        &mut self,
        wait: Duration,
    ) {
        if let Ok(Some(_)) = tokio::time::timeout(wait, self.rx.recv()).await {
            panic!("unexpected stream open");
        }
    }
}
