//! Test doubles for both halves of the watch protocol.
//!
//! - [`ScriptedTransport`] stands in for the gRPC transport of a client watch
//!   stream. Each successful `open` hands the test a [`MockWatchPeer`] that
//!   plays the server side of that physical stream.
//! - [`TestWatchServer`] runs a real server on an ephemeral local port, fed by
//!   a [`ChannelEventSource`](crate::ChannelEventSource) the test controls.

mod test_server;
mod watch_transport;

pub use test_server::*;
pub use watch_transport::*;
