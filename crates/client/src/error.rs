use redix_core::{CoreError, Version};
use redix_driver::DriverError;
use thiserror::Error;

/// Errors that can occur when using the redix client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Transport, server, or capability error from the driver.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The command is forbidden in development mode.
    #[error("command {command} is forbidden in development mode")]
    Forbidden { command: String },

    /// The server is older than the command requires.
    #[error("command {command} requires redis {required}, server runs {actual}")]
    UnsupportedVersion {
        command: String,
        required: Version,
        actual: Version,
    },

    /// A multi-key command touched keys in different hash slots.
    #[error("command {command} keys do not share a hash slot")]
    CrossSlot { command: String },

    /// The call's cancellation token fired before the reply arrived.
    #[error("operation cancelled")]
    Cancelled,

    /// The server INFO reply could not be understood.
    #[error("server probe failed: {0}")]
    Probe(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Returns `true` for the nil sentinel (missing key, empty reply).
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Driver(e) if e.is_nil())
    }

    /// Returns `true` if the error was raised by the development-mode
    /// preflight rather than by the server.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Forbidden { .. } | Self::UnsupportedVersion { .. } | Self::CrossSlot { .. }
        )
    }
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidVersion(_) | CoreError::MissingInfoField(_) => {
                Self::Probe(err.to_string())
            }
            other => Self::Configuration(other.to_string()),
        }
    }
}
