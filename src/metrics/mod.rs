use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref ACTIVE_WATCH_REGISTRATIONS: IntGauge = IntGauge::new(
        "watch_active_registrations",
        "Number of watch ids currently registered on this server"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCH_SESSIONS: IntGauge = IntGauge::new(
        "watch_sessions_active",
        "Number of open Watch streams"
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS_BROADCAST: IntCounter = IntCounter::new(
        "watch_broadcast_events_total",
        "Update events enqueued to watcher sinks"
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_events_dropped_total", "Update events dropped at a watcher sink"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_RECONNECT_ATTEMPTS: IntCounter = IntCounter::new(
        "watch_reconnect_attempts_total",
        "Transient failures that sent a client watch stream back to connecting"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(ACTIVE_WATCH_REGISTRATIONS.clone()),
        Box::new(ACTIVE_WATCH_SESSIONS.clone()),
        Box::new(WATCH_EVENTS_BROADCAST.clone()),
        Box::new(WATCH_EVENTS_DROPPED.clone()),
        Box::new(WATCH_RECONNECT_ATTEMPTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("collector can not be registered: {:?}", e);
        }
    }
}

/// Serves `/metrics` until `shutdown` is cancelled.
pub async fn start_server(
    port: u16,
    shutdown: CancellationToken,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (addr, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            shutdown.cancelled().await;
        });
    info!("metrics server listening on {}", addr);
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text(&REGISTRY))
}

pub(crate) fn gather_text(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
