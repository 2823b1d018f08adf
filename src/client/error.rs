//! Classification of watch stream failures.
//!
//! | condition                                   | outcome                    |
//! |---------------------------------------------|----------------------------|
//! | caller context cancelled                    | halt                       |
//! | `UNAVAILABLE`                               | reconnect with backoff     |
//! | `INTERNAL`                                  | reconnect with backoff     |
//! | any other code                              | halt                       |

use tokio_util::sync::CancellationToken;
use tonic::Code;
use tonic::Status;

/// Why a watch stream's task ended without a clean finish.
#[derive(Debug, thiserror::Error)]
pub(crate) enum WatchStreamError {
    #[error("watch halted by server: {0}")]
    Halted(Status),

    #[error("watch context cancelled")]
    Cancelled,
}

/// Error that must end the logical watch instead of reconnecting.
pub(crate) fn is_halt_error(
    ctx: &CancellationToken,
    status: &Status,
) -> bool {
    if ctx.is_cancelled() {
        return true;
    }
    !matches!(status.code(), Code::Unavailable | Code::Internal)
}

pub(crate) fn is_unavailable_error(
    ctx: &CancellationToken,
    status: &Status,
) -> bool {
    !ctx.is_cancelled() && status.code() == Code::Unavailable
}

/// Connection-level failures surface from the transport as `UNKNOWN`; treat
/// them as the server being unreachable.
pub(crate) fn normalize_transport_status(status: Status) -> Status {
    if status.code() != Code::Unknown {
        return status;
    }
    let msg = status.message();
    if msg.starts_with("Service was not ready")
        || msg.contains("transport error")
        || msg.contains("error reading a body from connection")
        || msg.contains("connection reset")
    {
        return Status::unavailable(msg.to_string());
    }
    status
}
