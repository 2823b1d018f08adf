//! A watch session protocol over bidirectional gRPC streams.
//!
//! - [`client`]: a reconnecting multiplexer that keeps one logical watch per
//!   watch id alive across transient stream failures
//! - [`server`]: per-connection watch sessions in front of a shared
//!   [`WatcherRegistry`], fed by an [`EventSource`]
//! - [`proto`]: the `watchpb` wire messages

pub mod client;
mod config;
mod errors;
mod metrics;
mod network;
pub mod proto;
pub mod server;
mod watch;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use network::*;
pub use proto::Endpoint;
pub use proto::GetAppServersResponse;
pub use proto::Subject;
pub use proto::WatchResponse;
pub use server::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
