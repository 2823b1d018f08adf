//! One logical watch on the client side.
//!
//! A [`ClientWatchStream`] owns a single watch id and keeps it alive across
//! physical stream failures:
//!
//! ```text
//!             open ok                     halt error / ctx cancelled
//! Connecting ---------> Active ------------------------------------+
//!    ^  |                 |  transient error                       |
//!    |  | halt            |  (UNAVAILABLE, INTERNAL, server EOF)   v
//!    |  +-----------------|--------------------------------------> Closed
//!    +--------------------+  reconnect + resend create
//! ```
//!
//! Responses are forwarded to the subscriber in server order. A `canceled`
//! response ends the logical watch after it has been delivered.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::backoff::WatchBackoff;
use super::error::is_halt_error;
use super::error::is_unavailable_error;
use super::error::WatchStreamError;
use super::ClientConfig;
use super::WatchTransport;
use crate::proto::WatchCancelRequest;
use crate::proto::WatchCreateRequest;
use crate::proto::WatchRequest;
use crate::proto::WatchResponse;
use crate::WATCH_RECONNECT_ATTEMPTS;

pub type WatchResponseReceiver = mpsc::Receiver<WatchResponse>;

/// Outcome of handing a watch request to a stream.
#[derive(Debug)]
pub(crate) enum HandOff {
    /// The stream took the request; responses arrive on the receiver
    Accepted(WatchResponseReceiver),
    /// The caller's context ended first
    Cancelled,
    /// The stream finished before taking the request
    StreamClosed,
}

enum StreamRequest {
    Create {
        request: WatchCreateRequest,
        accepted: oneshot::Sender<()>,
    },
    Cancel(WatchCancelRequest),
}

impl StreamRequest {
    fn into_parts(self) -> (WatchRequest, Option<oneshot::Sender<()>>) {
        match self {
            StreamRequest::Create { request, accepted } => (request.into(), Some(accepted)),
            StreamRequest::Cancel(cancel) => (cancel.into(), None),
        }
    }
}

/// What the receive half of a physical stream observed when it stopped.
#[derive(Debug)]
enum RecvEvent {
    Failed(Status),
    /// Server confirmed cancellation; already delivered to the subscriber
    Canceled,
    /// Subscriber dropped its receiver
    SubscriberGone,
}

pub(crate) struct ClientWatchStream {
    watch_id: String,
    init_request: WatchCreateRequest,
    /// Child of the caller's context
    ctx: CancellationToken,
    /// Cancelled once the stream is terminal
    done: CancellationToken,
    /// Graceful stop requested
    stop: CancellationToken,
    requests: mpsc::Sender<StreamRequest>,
    responses: Mutex<Option<WatchResponseReceiver>>,
    cancel_requested: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for ClientWatchStream {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientWatchStream")
            .field("watch_id", &self.watch_id)
            .field("done", &self.done.is_cancelled())
            .finish()
    }
}

impl ClientWatchStream {
    /// Creates the stream and starts its task. Nothing is sent until the
    /// first [`hand_off`](Self::hand_off).
    pub(crate) fn spawn(
        parent: &CancellationToken,
        init_request: WatchCreateRequest,
        transport: Arc<dyn WatchTransport>,
        config: &ClientConfig,
    ) -> Arc<Self> {
        let (requests, request_rx) = mpsc::channel(config.request_buffer_size);
        let (response_tx, responses) = mpsc::channel(config.response_buffer_size);

        let stream = Arc::new(Self {
            watch_id: init_request.watch_id.clone(),
            init_request,
            ctx: parent.child_token(),
            done: CancellationToken::new(),
            stop: CancellationToken::new(),
            requests,
            responses: Mutex::new(Some(responses)),
            cancel_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let runner = StreamRunner {
            stream: stream.clone(),
            transport,
            requests: request_rx,
            responses: response_tx,
            backoff_base: config.watch_backoff_base,
            backoff_max: config.watch_backoff_max,
            cancel_linger: config.cancel_linger,
            registered: false,
            cancel_sent: false,
        };
        tokio::spawn(runner.run());

        stream
    }

    pub(crate) fn watch_id(&self) -> &str {
        &self.watch_id
    }

    /// Queues the initial create request and waits until the stream has sent
    /// it, the caller gives up, or the stream dies.
    pub(crate) async fn hand_off(
        &self,
        ctx: &CancellationToken,
    ) -> HandOff {
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let request = StreamRequest::Create {
            request: self.init_request.clone(),
            accepted: accepted_tx,
        };
        let accepted = async {
            self.requests.send(request).await.ok()?;
            accepted_rx.await.ok()
        };

        tokio::select! {
            accepted = accepted => match accepted {
                Some(()) => match self.responses.lock().take() {
                    Some(receiver) => HandOff::Accepted(receiver),
                    None => HandOff::StreamClosed,
                },
                None => HandOff::StreamClosed,
            },
            _ = ctx.cancelled() => HandOff::Cancelled,
            _ = self.done.cancelled() => HandOff::StreamClosed,
        }
    }

    /// Asks the server to cancel this watch, then lets the stream finish.
    pub(crate) fn close_gracefully(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            let cancel = StreamRequest::Cancel(WatchCancelRequest {
                watch_id: self.watch_id.clone(),
            });
            if let Err(e) = self.requests.try_send(cancel) {
                debug!(watch_id = %self.watch_id, "Cancel request not queued: {}", e);
            }
        }
        self.stop.cancel();
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ctx.cancel();
            self.done.cancel();
            debug!(watch_id = %self.watch_id, "Watch stream closed");
        }
    }
}

type Connection = (mpsc::Sender<WatchRequest>, mpsc::Receiver<RecvEvent>);

struct StreamRunner {
    stream: Arc<ClientWatchStream>,
    transport: Arc<dyn WatchTransport>,
    requests: mpsc::Receiver<StreamRequest>,
    /// Dropped when the runner exits, which closes the subscriber's receiver
    responses: mpsc::Sender<WatchResponse>,
    backoff_base: Duration,
    backoff_max: Duration,
    cancel_linger: Duration,
    /// Create request has gone out at least once
    registered: bool,
    cancel_sent: bool,
}

impl StreamRunner {
    async fn run(mut self) {
        match self.serve().await {
            Ok(()) => debug!(watch_id = %self.stream.watch_id, "Watch stream finished"),
            Err(WatchStreamError::Halted(status)) => error!(
                watch_id = %self.stream.watch_id,
                code = ?status.code(),
                "Watch stream halted: {}",
                status.message()
            ),
            Err(WatchStreamError::Cancelled) => {
                debug!(watch_id = %self.stream.watch_id, "Watch context cancelled")
            }
        }
        self.stream.close();
    }

    async fn serve(&mut self) -> Result<(), WatchStreamError> {
        let (mut outbound, mut events) = match self.connect().await? {
            Some(connection) => connection,
            None => return Ok(()),
        };

        loop {
            tokio::select! {
                _ = self.stream.ctx.cancelled() => return Err(WatchStreamError::Cancelled),
                _ = self.stream.done.cancelled() => return Ok(()),
                _ = self.stream.stop.cancelled() => return self.finish(&outbound, &mut events).await,
                request = self.requests.recv() => match request {
                    Some(request) => self.send(&outbound, request).await,
                    None => return Ok(()),
                },
                event = events.recv() => match event {
                    Some(RecvEvent::Canceled) => return Ok(()),
                    Some(RecvEvent::SubscriberGone) => {
                        debug!(watch_id = %self.stream.watch_id, "Subscriber gone, cancelling watch");
                        self.stream.close_gracefully();
                    }
                    Some(RecvEvent::Failed(status)) => {
                        if is_halt_error(&self.stream.ctx, &status) {
                            return Err(WatchStreamError::Halted(status));
                        }
                        warn!(
                            watch_id = %self.stream.watch_id,
                            code = ?status.code(),
                            "Watch stream interrupted, reconnecting: {}",
                            status.message()
                        );
                        WATCH_RECONNECT_ATTEMPTS.inc();
                        match self.connect().await? {
                            Some((new_outbound, new_events)) => {
                                outbound = new_outbound;
                                events = new_events;
                            }
                            None => return Ok(()),
                        }
                        self.resume(&outbound).await;
                    }
                    None => return Ok(()),
                }
            }
        }
    }

    /// Opens a physical stream, retrying transient failures with backoff.
    ///
    /// `None` when a graceful stop arrived before a stream could be opened.
    async fn connect(&mut self) -> Result<Option<Connection>, WatchStreamError> {
        let mut backoff = WatchBackoff::new(self.backoff_base, self.backoff_max);
        loop {
            let opened = tokio::select! {
                _ = self.stream.ctx.cancelled() => return Err(WatchStreamError::Cancelled),
                _ = self.stream.stop.cancelled() => return Ok(None),
                opened = self.transport.open() => opened,
            };

            let status = match opened {
                Ok(channel) => {
                    let (event_tx, event_rx) = mpsc::channel(1);
                    tokio::spawn(receive_loop(
                        self.stream.watch_id.clone(),
                        channel.responses,
                        self.responses.clone(),
                        event_tx,
                        self.stream.done.clone(),
                    ));
                    trace!(watch_id = %self.stream.watch_id, retries = backoff.attempts(), "Watch stream opened");
                    return Ok(Some((channel.requests, event_rx)));
                }
                Err(status) => status,
            };

            if is_halt_error(&self.stream.ctx, &status) {
                return Err(WatchStreamError::Halted(status));
            }

            let delay = backoff.next_delay();
            if is_unavailable_error(&self.stream.ctx, &status) {
                debug!(
                    watch_id = %self.stream.watch_id,
                    retries = backoff.attempts(),
                    backoff = ?delay,
                    "Watch server unavailable: {}",
                    status.message()
                );
            } else {
                warn!(
                    watch_id = %self.stream.watch_id,
                    code = ?status.code(),
                    retries = backoff.attempts(),
                    backoff = ?delay,
                    "Failed to open watch stream: {}",
                    status.message()
                );
            }
            WATCH_RECONNECT_ATTEMPTS.inc();

            tokio::select! {
                _ = self.stream.ctx.cancelled() => return Err(WatchStreamError::Cancelled),
                _ = self.stream.stop.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Re-registers the watch on a freshly opened stream.
    async fn resume(
        &self,
        outbound: &mpsc::Sender<WatchRequest>,
    ) {
        if !self.registered {
            return;
        }
        let request = WatchRequest::from(self.stream.init_request.clone());
        if outbound.send(request).await.is_err() {
            // The receive half reports the failure and we reconnect again.
            debug!(watch_id = %self.stream.watch_id, "Stream gone before resume request was sent");
        }
    }

    async fn send(
        &mut self,
        outbound: &mpsc::Sender<WatchRequest>,
        request: StreamRequest,
    ) {
        let (message, accepted) = request.into_parts();
        self.registered |= message.is_create();
        self.cancel_sent |= message.is_cancel();
        let sent = tokio::select! {
            sent = outbound.send(message) => sent.is_ok(),
            _ = self.stream.ctx.cancelled() => false,
        };
        if !sent {
            debug!(watch_id = %self.stream.watch_id, "Failed to send watch request on current stream");
        }
        if let Some(accepted) = accepted {
            let _ = accepted.send(());
        }
    }

    /// Flushes queued requests. When a cancel went out, waits up to
    /// `cancel_linger` for the server to confirm it.
    async fn finish(
        &mut self,
        outbound: &mpsc::Sender<WatchRequest>,
        events: &mut mpsc::Receiver<RecvEvent>,
    ) -> Result<(), WatchStreamError> {
        while let Ok(request) = self.requests.try_recv() {
            self.send(outbound, request).await;
        }
        if !self.cancel_sent {
            return Ok(());
        }

        tokio::select! {
            _ = self.stream.ctx.cancelled() => {}
            event = events.recv() => trace!(watch_id = %self.stream.watch_id, event = ?event, "Watch stream finished after cancel"),
            _ = tokio::time::sleep(self.cancel_linger) => {
                debug!(watch_id = %self.stream.watch_id, linger = ?self.cancel_linger, "No cancel confirmation from server");
            }
        }
        Ok(())
    }
}

/// Forwards responses of one physical stream to the subscriber and reports
/// why it stopped.
async fn receive_loop(
    watch_id: String,
    mut inbound: BoxStream<'static, Result<WatchResponse, Status>>,
    responses: mpsc::Sender<WatchResponse>,
    events: mpsc::Sender<RecvEvent>,
    done: CancellationToken,
) {
    let event = loop {
        let item = tokio::select! {
            _ = done.cancelled() => return,
            item = inbound.next() => item,
        };

        match item {
            Some(Ok(response)) => {
                let canceled = response.canceled;
                let delivered = tokio::select! {
                    _ = done.cancelled() => return,
                    sent = responses.send(response) => sent.is_ok(),
                };
                if !delivered {
                    break RecvEvent::SubscriberGone;
                }
                if canceled {
                    break RecvEvent::Canceled;
                }
            }
            Some(Err(status)) => break RecvEvent::Failed(status),
            None => break RecvEvent::Failed(Status::unavailable("watch stream ended by server")),
        }
    };

    trace!(watch_id = %watch_id, event = ?event, "Receive loop stopped");
    let _ = events.send(event).await;
}
