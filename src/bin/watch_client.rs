//! Demo subscriber: watches one subject for a few seconds, printing every
//! response, then closes the watch.
//!
//! ```text
//! watch-client [endpoint] [seconds]
//! ```

use std::time::Duration;

use grpcwatch::Client;
use grpcwatch::Result;
use grpcwatch::Subject;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const WATCH_ID: &str = "watchertest";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| "http://127.0.0.1:5853".to_string());
    let seconds = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);

    let client = Client::builder(vec![endpoint]).build().await?;
    let ctx = CancellationToken::new();
    let mut responses = client
        .watcher()
        .watch(&ctx, WATCH_ID, Subject::new("watchertest", "qa"))
        .await;

    let printer = tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            println!(
                "created={} canceled={} reason={:?} endpoints={:?}",
                response.created, response.canceled, response.cancel_reason, response.endpoints
            );
        }
        info!("watch response stream closed");
    });

    tokio::time::sleep(Duration::from_secs(seconds)).await;
    client.watcher().close_stream(WATCH_ID);

    if tokio::time::timeout(Duration::from_secs(2), printer).await.is_err() {
        warn!("watch did not finish after close");
    }
    Ok(())
}
