use redix_client::ClientError;
use thiserror::Error;

/// Errors returned by delay queue operations.
#[derive(Debug, Clone, Error)]
pub enum DelayError {
    /// The queue has been closed.
    #[error("delay queue is closed")]
    Closed,

    #[error(transparent)]
    Client(#[from] ClientError),
}
