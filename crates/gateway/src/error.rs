pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session, transport or sidecar failure.
    #[error(transparent)]
    WhatsApp(#[from] warelay_whatsapp::Error),

    /// Filter or sink construction failure.
    #[error(transparent)]
    Pipeline(#[from] warelay_channels::Error),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl warelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

warelay_common::impl_context!();
