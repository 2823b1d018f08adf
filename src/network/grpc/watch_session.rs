//! Per-connection watch session
//!
//! One session serves one `Watch` RPC. It multiplexes any number of watch ids
//! onto a single response stream.
//!
//! # Architecture
//!
//! ```text
//! inbound requests --> receive loop --> WatcherRegistry (create/cancel)
//!                                              |
//!                                              v  (sink = session queue)
//! response stream  <-- send loop   <-- bounded queue <-- broadcast
//! ```
//!
//! # Lifecycle
//!
//! The coordinator waits for whichever comes first: the receive loop ending
//! (client EOF, cancel, inbound error), the client dropping the response
//! stream, or server shutdown. It then releases every watch this session
//! registered, closes the queue and gives the send loop `drain_timeout` to
//! flush what is left.
//!
//! On server shutdown the watches are released silently and the stream ends
//! with `UNAVAILABLE`, so clients reconnect instead of treating the watch as
//! finished.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use nanoid::nanoid;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::proto::watch_request::RequestUnion;
use crate::proto::WatchCreateRequest;
use crate::proto::WatchRequest;
use crate::proto::WatchResponse;
use crate::Error;
use crate::Registration;
use crate::WatchConfig;
use crate::WatchError;
use crate::WatcherRegistry;
use crate::ACTIVE_WATCH_SESSIONS;

pub(crate) const CLIENT_STOP_REASON: &str = "client stop";
pub(crate) const SESSION_CLOSED_REASON: &str = "watch stream closed";
pub(crate) const DUPLICATE_WATCH_ID_REASON: &str = "watch id already exists";
pub(crate) const SERVER_SHUTDOWN_MESSAGE: &str =
    "Watch stream closed: server is shutting down. Please reconnect and re-register the watcher.";

pub type ResponseSender = mpsc::Sender<Result<WatchResponse, Status>>;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client half-closed its request stream
    ClientClosed,
    /// Client sent a cancel request
    ClientCanceled,
    /// Client stopped reading responses
    Disconnected,
    /// Inbound stream failed
    InboundError,
    /// Request carried no known variant
    InvalidRequest,
    /// Session queue closed under the receive loop
    QueueClosed,
    ServerShutdown,
}

pub struct ServerWatchSession {
    session_id: String,
    registry: Arc<WatcherRegistry>,
    inbound: BoxStream<'static, Result<WatchRequest, Status>>,
    transport: ResponseSender,
    queue_size: usize,
    drain_timeout: Duration,
    server_shutdown: CancellationToken,
}

impl ServerWatchSession {
    pub fn new(
        registry: Arc<WatcherRegistry>,
        inbound: BoxStream<'static, Result<WatchRequest, Status>>,
        transport: ResponseSender,
        config: &WatchConfig,
        server_shutdown: CancellationToken,
    ) -> Self {
        Self {
            session_id: nanoid!(),
            registry,
            inbound,
            transport,
            queue_size: config.session_queue_size,
            drain_timeout: config.drain_timeout(),
            server_shutdown,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn run(self) -> SessionEnd {
        let Self {
            session_id,
            registry,
            inbound,
            transport,
            queue_size,
            drain_timeout,
            server_shutdown,
        } = self;

        ACTIVE_WATCH_SESSIONS.inc();
        debug!(session_id = %session_id, "Watch session started");

        let (queue_tx, queue_rx) = mpsc::channel(queue_size);
        let stop_sending = CancellationToken::new();
        let mut sender = tokio::spawn(send_loop(
            session_id.clone(),
            queue_rx,
            transport.clone(),
            stop_sending.clone(),
        ));

        let mut receiver = RequestReceiver {
            session_id: session_id.clone(),
            registry: registry.clone(),
            inbound,
            sink: queue_tx,
            registered: Vec::new(),
        };

        let end = tokio::select! {
            end = receiver.run() => end,
            _ = transport.closed() => SessionEnd::Disconnected,
            _ = server_shutdown.cancelled() => SessionEnd::ServerShutdown,
        };

        let reason = match end {
            SessionEnd::ServerShutdown => None,
            _ => Some(SESSION_CLOSED_REASON),
        };
        for watch_id in receiver.registered.drain(..) {
            registry.release_session_watch(&watch_id, &session_id, reason).await;
        }
        // Last sink handle held by this session; the send loop sees the queue
        // close once it has drained.
        drop(receiver);

        if tokio::time::timeout(drain_timeout, &mut sender).await.is_err() {
            debug!(session_id = %session_id, "Send loop did not drain in time, stopping it");
            stop_sending.cancel();
            let _ = sender.await;
        }

        if end == SessionEnd::ServerShutdown {
            let sentinel = transport.send(Err(Status::unavailable(SERVER_SHUTDOWN_MESSAGE)));
            if tokio::time::timeout(drain_timeout, sentinel).await.is_err() {
                debug!(session_id = %session_id, "Could not deliver shutdown notice");
            }
        }

        ACTIVE_WATCH_SESSIONS.dec();
        info!(session_id = %session_id, end = ?end, "Watch session closed");
        end
    }
}

/// Receive half of a session. Owns the session's sink handle and the ids it
/// has registered.
struct RequestReceiver {
    session_id: String,
    registry: Arc<WatcherRegistry>,
    inbound: BoxStream<'static, Result<WatchRequest, Status>>,
    sink: mpsc::Sender<WatchResponse>,
    registered: Vec<String>,
}

impl RequestReceiver {
    async fn run(&mut self) -> SessionEnd {
        while let Some(item) = self.inbound.next().await {
            let request = match item {
                Ok(request) => request,
                Err(status) => {
                    if is_client_ctx_err(&status) {
                        debug!(session_id = %self.session_id, "Client closed watch stream: {}", status);
                    } else {
                        warn!(session_id = %self.session_id, "Failed to receive watch request: {}", status);
                    }
                    return SessionEnd::InboundError;
                }
            };

            match request.request_union {
                Some(RequestUnion::CreateRequest(create)) => {
                    if let Err(end) = self.create(create).await {
                        return end;
                    }
                }
                Some(RequestUnion::CancelRequest(cancel)) => {
                    let removed = self.registry.cancel_watch(&cancel.watch_id, CLIENT_STOP_REASON).await;
                    debug!(
                        session_id = %self.session_id,
                        watch_id = %cancel.watch_id,
                        removed,
                        "Watch canceled by client"
                    );
                    return SessionEnd::ClientCanceled;
                }
                None => {
                    warn!(session_id = %self.session_id, "Watch request without a known variant");
                    return SessionEnd::InvalidRequest;
                }
            }
        }
        SessionEnd::ClientClosed
    }

    async fn create(
        &mut self,
        create: WatchCreateRequest,
    ) -> Result<(), SessionEnd> {
        let WatchCreateRequest { watch_id, subject } = create;
        let subject = subject.unwrap_or_default();

        // Tracked before registering; release is ownership-checked so an id
        // that never registered is a no-op.
        if !self.registered.contains(&watch_id) {
            self.registered.push(watch_id.clone());
        }

        let registration = Registration::new(subject.clone(), self.sink.clone(), self.session_id.as_str());
        match self.registry.create_watch(&watch_id, registration).await {
            Ok(()) => {
                trace!(session_id = %self.session_id, watch_id = %watch_id, subject = %subject, "Watch created");
                Ok(())
            }
            Err(Error::Watch(WatchError::AlreadyExists { .. })) => {
                debug!(session_id = %self.session_id, watch_id = %watch_id, "Rejected duplicate watch id");
                self.sink
                    .send(WatchResponse::rejected(Some(subject), DUPLICATE_WATCH_ID_REASON))
                    .await
                    .map_err(|_| SessionEnd::QueueClosed)
            }
            Err(e) => {
                debug!(session_id = %self.session_id, watch_id = %watch_id, "Failed to create watch: {}", e);
                Err(SessionEnd::QueueClosed)
            }
        }
    }
}

async fn send_loop(
    session_id: String,
    mut queue: mpsc::Receiver<WatchResponse>,
    transport: ResponseSender,
    stop: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = transport.closed() => {
                debug!(session_id = %session_id, "Client stopped reading, send loop exiting");
                break;
            }
            next = queue.recv() => match next {
                Some(response) => response,
                None => break,
            },
        };

        tokio::select! {
            _ = stop.cancelled() => break,
            sent = transport.send(Ok(response)) => {
                if sent.is_err() {
                    debug!(session_id = %session_id, "Client went away while sending watch response");
                    break;
                }
            }
        }
    }
    trace!(session_id = %session_id, "Send loop stopped");
}

/// Whether a stream error means the client simply went away (cancelled its
/// call, hit its deadline or dropped the connection).
pub(crate) fn is_client_ctx_err(status: &Status) -> bool {
    match status.code() {
        Code::Cancelled | Code::DeadlineExceeded => true,
        Code::Unavailable => {
            let msg = status.message();
            msg == "client disconnected" || (msg.starts_with("stream error: ") && msg.ends_with("; CANCEL"))
        }
        Code::Unknown => {
            let msg = status.message();
            msg.contains("stream no longer needed") || msg.contains("error reading a body from connection")
        }
        _ => false,
    }
}
