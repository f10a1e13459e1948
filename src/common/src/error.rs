//! Error taxonomy shared by the lister, the sweeper and the binary.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Transport could not be established or broke mid-exchange.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<io::Error>,
    },
    /// The listing response did not have the expected tabular shape.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Invalid policy or path setup, detected before any action is taken.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The accounts root could not be enumerated.
    #[error("Failed to read directory {}: {source}", path.display())]
    Inventory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A single orphan could not be deleted or moved.
    #[error("Failed to dispose of {}: {message}", path.display())]
    Disposal {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl SweepError {
    pub fn connection(message: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn disposal(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self::Disposal {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
