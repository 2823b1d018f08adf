//! Watch client
//!
//! Provides the client half of the watch protocol:
//! - [`Client`] - Main entry point sharing one channel between all calls
//! - [`ClientBuilder`] - Configurable client construction
//! - [`Watcher`] - Multiplexes watches, one reconnecting stream per watch id
//! - [`AppServerClient`] - Unary endpoint lookups
//!
//! # Basic Usage
//! ```no_run
//! use grpcwatch::{Client, Subject};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = Client::builder(vec!["http://127.0.0.1:5853".into()])
//!         .connect_timeout(Duration::from_secs(3))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let ctx = CancellationToken::new();
//!     let mut responses = client
//!         .watcher()
//!         .watch(&ctx, "watchertest", Subject::new("watchertest", "qa"))
//!         .await;
//!
//!     while let Some(response) = responses.recv().await {
//!         println!("{:?}", response.endpoints);
//!     }
//! }
//! ```

mod app_server;
mod backoff;
mod builder;
mod channel;
mod config;
mod error;
mod transport;
mod watch_stream;
mod watcher;

pub use app_server::*;
pub use builder::*;
pub use config::*;
pub use transport::*;
pub use watch_stream::WatchResponseReceiver;
pub use watcher::*;


use std::sync::Arc;

/// Main entry point for talking to a watch server
///
/// Created through the [`builder()`](Client::builder) method
#[derive(Clone, Debug)]
pub struct Client {
    pub(super) watcher: Arc<Watcher>,
    pub(super) app_servers: AppServerClient,
}

impl Client {
    /// Access the watch multiplexer
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Access unary endpoint lookups
    ///
    /// # Examples
    /// ```rust,ignore
    /// let servers = client.app_servers().get_app_servers(subject).await?;
    /// ```
    pub fn app_servers(&self) -> &AppServerClient {
        &self.app_servers
    }

    /// Create a configured client builder
    ///
    /// Chain configuration methods before calling
    /// [`build()`](ClientBuilder::build).
    pub fn builder(endpoints: Vec<String>) -> ClientBuilder {
        ClientBuilder::new(endpoints)
    }
}
