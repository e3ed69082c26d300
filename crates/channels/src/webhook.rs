//! Best-effort HTTP forwarding of accepted messages.

use std::time::Duration;

use {
    hmac::{Hmac, Mac},
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    sha2::Sha256,
    tracing::debug,
};

use crate::{Error, Result, message::NormalizedMessage};

type HmacSha256 = Hmac<Sha256>;

/// Event name carried in every webhook envelope.
pub const WEBHOOK_EVENT: &str = "wa.message";

/// Header carrying `sha256=<hex>` when a signing secret is configured.
pub const SIGNATURE_HEADER: &str = "X-Warelay-Signature";

/// Longest response body kept in a failure message.
const MAX_ERROR_BODY: usize = 512;

/// JSON body posted to the webhook.
#[derive(Debug, Serialize)]
pub struct WebhookEnvelope<'a> {
    pub event: &'static str,
    pub data: &'a NormalizedMessage,
}

impl<'a> WebhookEnvelope<'a> {
    pub fn new(data: &'a NormalizedMessage) -> Self {
        Self {
            event: WEBHOOK_EVENT,
            data,
        }
    }
}

/// Compute the signature header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(Error::invalid_input)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Posts each message to one configured URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    secret: Option<Secret<String>>,
    timeout: Duration,
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebhookSink {
    pub fn new(
        url: impl Into<String>,
        secret: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("warelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `{event, data}` to the webhook. Any status of 400 or above is a
    /// failure.
    pub async fn deliver(&self, message: &NormalizedMessage) -> Result<()> {
        let body = serde_json::to_vec(&WebhookEnvelope::new(message))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret.expose_secret(), &body)?);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(Error::WebhookStatus {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            status = status.as_u16(),
            message_id = %message.message_id,
            "webhook delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, serde_json::json};

    fn message() -> NormalizedMessage {
        NormalizedMessage {
            thread_id: "120@g.us".into(),
            message_id: "M1".into(),
            sender_id: "49151@s.whatsapp.net".into(),
            timestamp_seconds: 1_718_000_000.0,
            text: "Invoice #42".into(),
            has_media: false,
            timestamp_estimated: false,
        }
    }

    #[tokio::test]
    async fn posts_event_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "event": "wa.message",
                "data": {
                    "threadId": "120@g.us",
                    "messageId": "M1",
                    "senderId": "49151@s.whatsapp.net",
                    "timestampSeconds": 1718000000.0,
                    "text": "Invoice #42",
                    "hasMedia": false
                }
            })))
            .with_status(204)
            .create_async()
            .await;

        let sink = WebhookSink::new(
            format!("{}/hook", server.url()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        sink.deliver(&message()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failure_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let sink = WebhookSink::new(
            format!("{}/hook", server.url()),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = sink.deliver(&message()).await.unwrap_err();
        match err {
            Error::WebhookStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "upstream down");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn signs_body_when_secret_set() {
        let msg = message();
        let body = serde_json::to_vec(&WebhookEnvelope::new(&msg)).unwrap();
        let expected = sign("s3cret", &body).unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header(SIGNATURE_HEADER, expected.as_str())
            .with_status(200)
            .create_async()
            .await;

        let sink = WebhookSink::new(
            format!("{}/hook", server.url()),
            Some(Secret::new("s3cret".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        sink.deliver(&msg).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn signature_format() {
        let sig = sign("key", b"{}").unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }

    #[test]
    fn debug_redacts_secret() {
        let sink = WebhookSink::new(
            "https://hooks.example.com",
            Some(Secret::new("s3cret".to_string())),
            Duration::from_secs(1),
        )
        .unwrap();
        let rendered = format!("{sink:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("REDACTED"));
    }
}
