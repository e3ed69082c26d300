//! [`Transport`] over the Baileys sidecar's local WebSocket.

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::net::TcpStream,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{self, Message},
    },
    tracing::{debug, warn},
    warelay_channels::RawInboundEvent,
};

use crate::{
    Result,
    credentials::CredentialChange,
    transport::{
        DisconnectReason, LoginRequest, PairingChallenge, Transport, TransportEvent,
        TransportLink,
    },
    types::{ConnectionPhase, GatewayMessage, SidecarMessage},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a sidecar listening at a `ws://` URL.
#[derive(Debug, Clone)]
pub struct SidecarTransport {
    url: String,
}

impl SidecarTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn open(&self, login: LoginRequest) -> Result<Box<dyn TransportLink>> {
        debug!(url = %self.url, session_id = %login.session_id, "connecting to sidecar");
        let (ws, _response) = connect_async(self.url.as_str()).await?;
        let mut link = SidecarLink { ws, closed: false };
        link.send(&GatewayMessage::Login {
            session_id: login.session_id,
            creds: login.creds,
            keys: login.keys,
            pair_mode: login.pair_mode.as_str().to_string(),
            phone_number: login.phone_number,
        })
        .await?;
        Ok(Box::new(link))
    }
}

/// One sidecar WebSocket.
pub struct SidecarLink {
    ws: WsStream,
    closed: bool,
}

impl SidecarLink {
    async fn send(&mut self, frame: &GatewayMessage) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    fn ended(&mut self, reason: DisconnectReason) -> Option<Result<TransportEvent>> {
        self.closed = true;
        Some(Ok(TransportEvent::Closed(reason)))
    }
}

#[async_trait]
impl TransportLink for SidecarLink {
    async fn next_event(&mut self) -> Option<Result<TransportEvent>> {
        if self.closed {
            return None;
        }
        loop {
            let message = match self.ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(e.into()));
                },
                None => return self.ended(DisconnectReason::transient("sidecar socket ended")),
            };
            match message {
                Message::Text(text) => {
                    let Some(event) = decode_frame(text.as_str()) else {
                        continue;
                    };
                    if matches!(event, TransportEvent::Closed(_)) {
                        self.closed = true;
                    }
                    return Some(Ok(event));
                },
                Message::Ping(data) => {
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        self.closed = true;
                        return Some(Err(e.into()));
                    }
                },
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "sidecar closed socket".into());
                    return self.ended(DisconnectReason::transient(reason));
                },
                _ => {},
            }
        }
    }

    async fn acknowledge_credentials(&mut self, revision: u64) -> Result<()> {
        self.send(&GatewayMessage::CredsPersisted { revision }).await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        match self.ws.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Translate one sidecar text frame. Frames that carry nothing for the
/// connection manager (errors, unknown types) yield `None` after logging.
pub(crate) fn decode_frame(text: &str) -> Option<TransportEvent> {
    let frame = match serde_json::from_str::<SidecarMessage>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "ignoring undecodable sidecar frame");
            return None;
        },
    };
    match frame {
        SidecarMessage::Connection {
            connection,
            status_code,
            reason,
            me,
        } => Some(match connection {
            ConnectionPhase::Connecting => TransportEvent::Connecting,
            ConnectionPhase::Open => TransportEvent::Open { me },
            ConnectionPhase::Close => TransportEvent::Closed(DisconnectReason::new(
                status_code,
                reason.unwrap_or_else(|| "connection closed".into()),
            )),
        }),
        SidecarMessage::CredsUpdate { creds } => Some(TransportEvent::Credentials(
            CredentialChange::Creds(creds),
        )),
        SidecarMessage::KeysUpdate { keys } => {
            Some(TransportEvent::Credentials(CredentialChange::Keys(keys)))
        },
        SidecarMessage::Qr { qr } => Some(TransportEvent::Pairing(PairingChallenge::Qr(qr))),
        SidecarMessage::PairingCode { code } => {
            Some(TransportEvent::Pairing(PairingChallenge::Code(code)))
        },
        SidecarMessage::MessagesUpsert {
            upsert_type,
            messages,
        } => {
            let total = messages.len();
            let decoded: Vec<RawInboundEvent> = messages
                .into_iter()
                .filter_map(|raw| match serde_json::from_value(raw) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable message");
                        None
                    },
                })
                .collect();
            debug!(
                upsert_type = upsert_type.as_deref().unwrap_or("unknown"),
                total,
                decoded = decoded.len(),
                "messages upsert"
            );
            (!decoded.is_empty()).then_some(TransportEvent::Messages(decoded))
        },
        SidecarMessage::Error { error } => {
            warn!(%error, "sidecar reported an error");
            None
        },
    }
}
