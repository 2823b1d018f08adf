use std::path::Path;

use grpcwatch::Error;
use grpcwatch::LogConfig;
use grpcwatch::NetworkError;
use grpcwatch::Result;
use grpcwatch::WatchServer;
use grpcwatch::WatchServerConfig;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = WatchServerConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.log)?;

    // Initializing Shutdown Signal
    let shutdown = CancellationToken::new();

    if settings.monitoring.prometheus_enabled {
        tokio::spawn(grpcwatch::start_server(
            settings.monitoring.prometheus_port,
            shutdown.clone(),
        ));
    }

    // Listen on Shutdown Signal
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = graceful_shutdown(signal_token).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    info!("Watch server starting. Waiting for CTRL+C signal to stop...");
    if let Err(e) = WatchServer::builder(settings, shutdown.clone()).build().serve().await {
        error!("watch server stops: {:?}", e);
        return Err(e);
    }

    println!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(shutdown: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| Error::from(NetworkError::SignalHandlerFailed(format!("SIGINT handler: {e}"))))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::from(NetworkError::SignalHandlerFailed(format!("SIGTERM handler: {e}"))))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    info!("Shutdown server..");
    shutdown.cancel();
    Ok(())
}

/// Logs to stdout, or to a daily rolling file under `log.dir` when set.
/// `RUST_LOG` takes precedence over `log.level`.
fn init_observability(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .map_err(|e| Error::Fatal(format!("invalid log filter: {e}")))?;

    match &log.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(Path::new(dir), "grpcwatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter);
            tracing_subscriber::registry().with(file_layer).init();
            Ok(Some(guard))
        }
        None => {
            let stdout_layer = tracing_subscriber::fmt::layer().with_filter(filter);
            tracing_subscriber::registry().with(stdout_layer).init();
            Ok(None)
        }
    }
}
