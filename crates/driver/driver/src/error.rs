use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a driver backend.
///
/// Several variants describe capability mismatches between the requested
/// configuration and the server. The connect negotiation recognizes them and
/// retries with an adjusted configuration.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The reply was nil (for example a missing key).
    #[error("redis nil message")]
    Nil,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("io error: {0}")]
    Io(String),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The call exceeded its deadline. The duration is known when the
    /// deadline was ours rather than the transport's.
    #[error("operation timed out{}", .0.map(|d| format!(" after {d:?}")).unwrap_or_default())]
    Timeout(Option<Duration>),

    /// The driver or connection has been closed.
    #[error("connection closed")]
    Closed,

    /// Client-side caching was requested but cannot be used.
    #[error("client-side caching unavailable: no cache")]
    NoCache,

    /// A cluster client was pointed at a server without cluster support.
    #[error("cluster support disabled: {0}")]
    ClusterDisabled(String),

    /// The caller's cluster flag disagrees with the server's `cluster_enabled`.
    #[error("Cluster setting conflict: configured cluster={configured}, server reports cluster={observed}")]
    ClusterSettingConflict { configured: bool, observed: bool },

    /// `CLUSTER SLOTS` carried a node address the client could not read.
    #[error("wrong number of elements in cluster info address, expected 2 or 3: {0}")]
    ClusterAddressFormat(String),

    /// The server refused `HELLO 3`.
    #[error("RESP3 not supported by server: {0}")]
    Resp3Unsupported(String),

    /// The key's slot is not served by any known node.
    #[error("the slot has no redis node")]
    NoSlotNode,

    /// The reply had a shape the caller did not expect.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl DriverError {
    /// Returns `true` for the nil sentinel.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Map a raw error message onto the typed variants the negotiation
    /// understands. Anything unrecognized becomes [`DriverError::Server`].
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("cluster support disabled") {
            Self::ClusterDisabled(message)
        } else if lower.contains("elements in cluster info address") {
            Self::ClusterAddressFormat(message)
        } else if lower.contains("slot has no redis node") || lower.contains("slot not covered") {
            Self::NoSlotNode
        } else if lower.contains("no cache") {
            Self::NoCache
        } else {
            Self::Server(message)
        }
    }
}
