use std::{path::PathBuf, time::Duration};

use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid session id '{id}': {reason}")]
    InvalidSessionId { id: String, reason: &'static str },

    /// Rotated credentials could not be written; the connection attempt that
    /// produced them must not continue.
    #[error("failed to persist credentials: {source}")]
    CredentialPersistence {
        #[source]
        source: Box<Error>,
    },

    #[error("session file {} is corrupt: {source}", path.display())]
    CorruptSession {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("file lock failed: {message}")]
    Lock { message: String },

    #[error("sidecar protocol error: {message}")]
    Protocol { message: String },

    #[error("handshake timed out after {}s", after.as_secs())]
    HandshakeTimeout { after: Duration },

    #[error("sidecar: {message}")]
    Sidecar { message: String },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    WebSocket(Box<tungstenite::Error>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    #[must_use]
    pub fn protocol(message: impl std::fmt::Display) -> Self {
        Self::Protocol {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn sidecar(message: impl std::fmt::Display) -> Self {
        Self::Sidecar {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn credential_persistence(source: Error) -> Self {
        Self::CredentialPersistence {
            source: Box::new(source),
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl warelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

warelay_common::impl_context!();
