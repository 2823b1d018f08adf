//! Client-side watch multiplexer.
//!
//! Keeps at most one [`ClientWatchStream`] per watch id. Each stream
//! reconnects on its own, so one failing watch never disturbs the others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::watch_stream::ClientWatchStream;
use super::watch_stream::HandOff;
use super::ClientConfig;
use super::WatchResponseReceiver;
use super::WatchTransport;
use crate::proto::Subject;
use crate::proto::WatchCreateRequest;

/// Hand-off attempts before `watch` gives up on a stream that keeps dying
/// before it accepts the request.
const WATCH_HANDOFF_ATTEMPTS: usize = 2;

pub struct Watcher {
    transport: Arc<dyn WatchTransport>,
    config: ClientConfig,
    /// `None` once the watcher is closed
    streams: RwLock<Option<HashMap<String, Arc<ClientWatchStream>>>>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("streams", &self.stream_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Watcher {
    pub fn new(
        transport: Arc<dyn WatchTransport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            config,
            streams: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Starts watching `subject` under `watch_id`.
    ///
    /// The returned receiver yields every response of the watch, starting
    /// with `created`, and closes when the watch ends: after a `canceled`
    /// response, a non-retryable error, `ctx` cancellation, or
    /// [`close_stream`](Self::close_stream).
    ///
    /// The receiver is already closed when the watcher is closed or
    /// `watch_id` already has a stream. A stream that ended on its own keeps
    /// the id until [`close_stream`](Self::close_stream) removes it.
    pub async fn watch(
        &self,
        ctx: &CancellationToken,
        watch_id: &str,
        subject: Subject,
    ) -> WatchResponseReceiver {
        for attempt in 0..WATCH_HANDOFF_ATTEMPTS {
            let stream = match self.open_stream(ctx, watch_id, &subject) {
                Some(stream) => stream,
                None => return closed_receiver(),
            };

            match stream.hand_off(ctx).await {
                HandOff::Accepted(receiver) => return receiver,
                HandOff::Cancelled => {
                    debug!(watch_id, "Watch context cancelled before the stream accepted it");
                    self.remove_if_current(watch_id, &stream);
                    return closed_receiver();
                }
                HandOff::StreamClosed => {
                    // Retry only if the dead stream was still ours to replace.
                    if !self.remove_if_current(watch_id, &stream) {
                        return closed_receiver();
                    }
                    debug!(watch_id, attempt, "Watch stream closed before accepting, retrying");
                }
            }
        }
        warn!(watch_id, "Watch stream kept closing before accepting the watch");
        closed_receiver()
    }

    fn open_stream(
        &self,
        ctx: &CancellationToken,
        watch_id: &str,
        subject: &Subject,
    ) -> Option<Arc<ClientWatchStream>> {
        let mut guard = self.streams.write();
        let Some(streams) = guard.as_mut() else {
            debug!(watch_id, "Watcher closed, refusing new watch");
            return None;
        };

        if streams.contains_key(watch_id) {
            warn!(watch_id, "Watch id already has a stream, close it before watching again");
            return None;
        }

        let request = WatchCreateRequest {
            watch_id: watch_id.to_string(),
            subject: Some(subject.clone()),
        };
        let stream = ClientWatchStream::spawn(ctx, request, self.transport.clone(), &self.config);
        streams.insert(watch_id.to_string(), stream.clone());
        Some(stream)
    }

    fn remove_if_current(
        &self,
        watch_id: &str,
        stream: &Arc<ClientWatchStream>,
    ) -> bool {
        let mut guard = self.streams.write();
        let Some(streams) = guard.as_mut() else {
            return false;
        };
        match streams.get(watch_id) {
            Some(current) if Arc::ptr_eq(current, stream) => {
                streams.remove(watch_id);
                true
            }
            _ => false,
        }
    }

    /// Gracefully stops the watch under `watch_id`: a cancel request is sent
    /// and the stream finishes once the server confirms or the linger period
    /// expires. Unknown ids are ignored.
    pub fn close_stream(
        &self,
        watch_id: &str,
    ) {
        let stream = self.streams.write().as_mut().and_then(|streams| streams.remove(watch_id));
        match stream {
            Some(stream) => stream.close_gracefully(),
            None => debug!(watch_id, "No watch stream to close"),
        }
    }

    /// Stops every watch. Later `watch` calls return a closed receiver.
    pub fn close(&self) {
        let streams = self.streams.write().take();
        for (_, stream) in streams.into_iter().flatten() {
            debug!(watch_id = stream.watch_id(), "Closing watch stream");
            stream.close_gracefully();
        }
    }

    pub fn is_watching(
        &self,
        watch_id: &str,
    ) -> bool {
        self.streams
            .read()
            .as_ref()
            .and_then(|streams| streams.get(watch_id))
            .is_some_and(|stream| !stream.is_done())
    }

    /// Number of live watch streams.
    pub fn stream_count(&self) -> usize {
        self.streams
            .read()
            .as_ref()
            .map_or(0, |streams| streams.values().filter(|s| !s.is_done()).count())
    }

    pub fn is_closed(&self) -> bool {
        self.streams.read().is_none()
    }
}

fn closed_receiver() -> WatchResponseReceiver {
    let (_, receiver) = mpsc::channel(1);
    receiver
}
