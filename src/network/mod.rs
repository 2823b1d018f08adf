//! Network layer of the watch server.
pub mod grpc;
