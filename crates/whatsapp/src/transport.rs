//! Seam between the connection manager and the socket that speaks the
//! multi-device protocol.

use std::collections::BTreeMap;

use {async_trait::async_trait, warelay_channels::RawInboundEvent, warelay_config::PairMode};

use crate::{
    Result,
    credentials::{CredentialChange, Session},
};

/// Close status the transport uses for "credentials revoked".
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Everything the transport needs to resume (or start) a session.
#[derive(Clone)]
pub struct LoginRequest {
    pub session_id: String,
    pub creds: serde_json::Value,
    pub keys: BTreeMap<String, serde_json::Value>,
    pub pair_mode: PairMode,
    pub phone_number: Option<String>,
}

impl LoginRequest {
    pub fn from_session(
        session_id: &str,
        session: &Session,
        pair_mode: PairMode,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            creds: serde_json::Value::Object(session.creds.clone()),
            keys: session.keys.clone(),
            pair_mode,
            phone_number,
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("session_id", &self.session_id)
            .field("pair_mode", &self.pair_mode)
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

/// Why a socket closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub status_code: Option<u16>,
    pub message: String,
}

impl DisconnectReason {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn logged_out() -> Self {
        Self::new(Some(LOGGED_OUT_STATUS), "logged out")
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// The only terminal close: the server revoked this device.
    #[must_use]
    pub fn is_logged_out(&self) -> bool {
        self.status_code == Some(LOGGED_OUT_STATUS)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (status {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Out-of-band pairing challenge, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingChallenge {
    /// Token to be rendered as a QR code.
    Qr(String),
    /// Numeric code to be typed on the phone.
    Code(String),
}

impl PairingChallenge {
    pub fn token(&self) -> &str {
        match self {
            Self::Qr(t) | Self::Code(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Qr(_) => "qr",
            Self::Code(_) => "code",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connecting,
    Open { me: Option<String> },
    Closed(DisconnectReason),
    Credentials(CredentialChange),
    Pairing(PairingChallenge),
    Messages(Vec<RawInboundEvent>),
}

/// One live socket.
#[async_trait]
pub trait TransportLink: Send {
    /// Next event, or `None` once the socket is gone.
    async fn next_event(&mut self) -> Option<Result<TransportEvent>>;

    /// Tell the transport a rotation reached durable storage.
    async fn acknowledge_credentials(&mut self, revision: u64) -> Result<()>;

    /// Close the socket without logging the device out.
    async fn close(&mut self) -> Result<()>;
}

/// Opens sockets; one call per connection attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, login: LoginRequest) -> Result<Box<dyn TransportLink>>;
}
