//! Watch service error hierarchy
//!
//! Errors are grouped by layer: infrastructure (network, io), configuration,
//! and watch protocol failures raised by the registry and sessions.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, io)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Watch protocol failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Endpoint unavailable (HTTP 503 equivalent)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Client built without any endpoint
    #[error("No endpoints configured")]
    EmptyEndpointList,

    /// Malformed endpoint addresses
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),

    #[error("{0}")]
    SignalHandlerFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Duplicate create refused by the registry
    #[error("Watch id {watch_id} is already registered by another session")]
    AlreadyExists { watch_id: String },

    /// The session that owns the sink has gone away
    #[error("Sink for watch {watch_id} is closed")]
    SinkClosed { watch_id: String },
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(e)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        NetworkError::TonicStatusError(Box::new(status)).into()
    }
}
