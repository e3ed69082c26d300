use std::time::Duration;

/// Crate-wide result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed pipeline errors shared across the router, filter and sinks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid pipeline input: {message}")]
    InvalidInput { message: String },

    /// The keyword pattern does not compile.
    #[error("invalid keyword pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The webhook answered with a failure status.
    #[error("webhook returned {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    /// A sink did not finish within its deadline.
    #[error("{sink} timed out after {}ms", after.as_millis())]
    Timeout { sink: &'static str, after: Duration },

    /// Advisory file lock could not be taken.
    #[error("file lock failed: {message}")]
    Lock { message: String },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn lock_failed(message: impl std::fmt::Display) -> Self {
        Self::Lock {
            message: message.to_string(),
        }
    }
}

impl warelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

warelay_common::impl_context!();
