use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::WatcherRegistry;
use crate::proto::Endpoint;
use crate::proto::Subject;

/// New endpoint set of one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUpdate {
    pub subject: Subject,
    pub endpoints: Vec<Endpoint>,
}

impl EndpointUpdate {
    pub fn new(
        subject: Subject,
        endpoints: Vec<Endpoint>,
    ) -> Self {
        Self { subject, endpoints }
    }
}

/// Producer of endpoint changes (a backing store, a discovery system, a
/// timer).
#[tonic::async_trait]
pub trait EventSource: Send + 'static {
    /// Waits for the next batch of updates. `None` means the source is
    /// exhausted and the broadcaster should stop.
    async fn next_updates(&mut self) -> Option<Vec<EndpointUpdate>>;
}

/// Publishes a fixed endpoint list on every tick.
///
/// With subject filtering each watched subject gets its own update; without
/// it a single update is broadcast to every watcher.
pub struct IntervalEventSource {
    interval: Interval,
    endpoints: Vec<Endpoint>,
    registry: Arc<WatcherRegistry>,
}

impl IntervalEventSource {
    pub fn new(
        period: Duration,
        endpoints: Vec<Endpoint>,
        registry: Arc<WatcherRegistry>,
    ) -> Self {
        // First tick one period from now, not immediately
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            endpoints,
            registry,
        }
    }
}

#[tonic::async_trait]
impl EventSource for IntervalEventSource {
    async fn next_updates(&mut self) -> Option<Vec<EndpointUpdate>> {
        self.interval.tick().await;

        if self.registry.is_empty() {
            return Some(Vec::new());
        }

        let subjects = if self.registry.filters_by_subject() {
            self.registry.subjects()
        } else {
            vec![Subject::default()]
        };

        Some(
            subjects
                .into_iter()
                .map(|subject| EndpointUpdate::new(subject, self.endpoints.clone()))
                .collect(),
        )
    }
}

/// Event source fed through an mpsc channel.
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<EndpointUpdate>,
}

impl ChannelEventSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<EndpointUpdate>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, Self { receiver })
    }
}

#[tonic::async_trait]
impl EventSource for ChannelEventSource {
    async fn next_updates(&mut self) -> Option<Vec<EndpointUpdate>> {
        let first = self.receiver.recv().await?;
        let mut batch = vec![first];
        while let Ok(update) = self.receiver.try_recv() {
            batch.push(update);
        }
        Some(batch)
    }
}

/// Pulls updates from an [`EventSource`] and fans them out through the
/// registry until shutdown.
pub struct Broadcaster {
    source: Box<dyn EventSource>,
    registry: Arc<WatcherRegistry>,
    shutdown: CancellationToken,
}

impl Broadcaster {
    pub fn new(
        source: Box<dyn EventSource>,
        registry: Arc<WatcherRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        debug!("Broadcaster started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("Broadcaster received shutdown signal");
                    break;
                }
                batch = self.source.next_updates() => {
                    let Some(updates) = batch else {
                        info!("Event source exhausted, broadcaster stopping");
                        break;
                    };
                    for update in &updates {
                        let delivered = self.registry.broadcast(update);
                        trace!(subject = %update.subject, delivered, "Broadcast tick");
                    }
                }
            }
        }
        debug!("Broadcaster stopped");
    }
}
