/// Config schema types (session, transport, sidecar, filter, webhook, store,
/// pipeline, metrics).
use std::{net::SocketAddr, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Deserializer, Serialize},
};

/// Session identifier used when none is configured.
pub const DEFAULT_SESSION_ID: &str = "baileys_session";

/// Default port of the Baileys sidecar WebSocket server.
pub const DEFAULT_SIDECAR_PORT: u16 = 3781;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub sidecar: SidecarConfig,
    pub filter: FilterConfig,
    pub webhook: WebhookConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub metrics: MetricsConfig,
}

/// Where the persisted WhatsApp credentials live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session identifier; also the directory name under `dir`.
    pub id: String,
    /// Base directory holding one sub-directory per session.
    /// Defaults to `<data dir>/sessions`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_SESSION_ID.into(),
            dir: None,
        }
    }
}

/// How a new device is linked to the account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PairMode {
    /// Scannable QR token.
    #[default]
    Qr,
    /// Numeric pairing code entered on the phone.
    Code,
}

impl PairMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::Code => "code",
        }
    }
}

impl std::str::FromStr for PairMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qr" => Ok(Self::Qr),
            "code" => Ok(Self::Code),
            other => Err(format!("unknown pair mode '{other}' (expected qr or code)")),
        }
    }
}

/// Connection to the Baileys sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket URL of the sidecar.
    pub sidecar_url: String,
    pub pair_mode: PairMode,
    /// Phone number (digits, with country code) for `code` pairing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub handshake_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            sidecar_url: format!("ws://127.0.0.1:{DEFAULT_SIDECAR_PORT}"),
            pair_mode: PairMode::default(),
            phone_number: None,
            handshake_timeout_secs: 20,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Backoff applied between consecutive failed connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Optional management of the sidecar process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Spawn and supervise `node dist/index.js` from `dir`.
    pub auto_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub port: u16,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            dir: None,
            port: DEFAULT_SIDECAR_PORT,
        }
    }
}

/// Group allow-list and keyword filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Thread identifiers to accept; empty accepts every group.
    /// Accepts a list or a single comma-separated string.
    #[serde(deserialize_with = "deserialize_id_list")]
    pub allowed_groups: Vec<String>,
    /// Case-insensitive regular expression the text must match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

/// Outbound webhook forwarding.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub forward: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Shared secret for the `X-Warelay-Signature` HMAC header.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_option_secret"
    )]
    pub secret: Option<Secret<String>>,
    pub timeout_secs: u64,
    pub max_in_flight: usize,
}

impl WebhookConfig {
    /// URL to post to, if forwarding is on and a non-empty URL is set.
    pub fn target(&self) -> Option<&str> {
        if !self.forward {
            return None;
        }
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("forward", &self.forward)
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            forward: true,
            url: None,
            secret: None,
            timeout_secs: 10,
            max_in_flight: 16,
        }
    }
}

/// Durable append-only output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSONL file receiving one record per accepted message.
    /// Defaults to `<data dir>/dataset.jsonl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_secs: 5,
        }
    }
}

/// Inbound queue sizing and shutdown behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address for the Prometheus scrape endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: Some(SocketAddr::from(([127, 0, 0, 1], 9464))),
        }
    }
}

/// Split a comma-separated id list, trimming blanks.
pub fn split_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdList {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match IdList::deserialize(deserializer)? {
        IdList::Joined(raw) => split_id_list(&raw),
        IdList::List(items) => items
            .iter()
            .flat_map(|item| split_id_list(item))
            .collect(),
    })
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_str(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.session.id, "baileys_session");
        assert_eq!(cfg.transport.pair_mode, PairMode::Qr);
        assert!(cfg.webhook.forward);
        assert!(cfg.filter.allowed_groups.is_empty());
        assert_eq!(cfg.pipeline.queue_capacity, 256);
        assert_eq!(cfg.transport.sidecar_url, "ws://127.0.0.1:3781");
    }

    #[test]
    fn allowed_groups_from_comma_string() {
        let cfg: FilterConfig =
            toml::from_str(r#"allowed_groups = " 120@g.us, ,999@g.us ""#).unwrap();
        assert_eq!(cfg.allowed_groups, vec!["120@g.us", "999@g.us"]);
    }

    #[test]
    fn allowed_groups_from_list() {
        let cfg: FilterConfig =
            serde_json::from_str(r#"{"allowed_groups": ["120@g.us", "5@g.us,6@g.us"]}"#).unwrap();
        assert_eq!(cfg.allowed_groups, vec!["120@g.us", "5@g.us", "6@g.us"]);
    }

    #[test]
    fn webhook_target_requires_forward_and_url() {
        let mut cfg = WebhookConfig {
            url: Some("https://hooks.example.com/wa".into()),
            ..Default::default()
        };
        assert_eq!(cfg.target(), Some("https://hooks.example.com/wa"));
        cfg.forward = false;
        assert_eq!(cfg.target(), None);
        cfg.forward = true;
        cfg.url = Some("   ".into());
        assert_eq!(cfg.target(), None);
    }

    #[test]
    fn webhook_debug_redacts_secret() {
        let cfg = WebhookConfig {
            secret: Some(Secret::new("hunter2".into())),
            ..Default::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn pair_mode_parses() {
        assert_eq!("CODE".parse::<PairMode>().unwrap(), PairMode::Code);
        assert_eq!(" qr ".parse::<PairMode>().unwrap(), PairMode::Qr);
        assert!("sms".parse::<PairMode>().is_err());
    }
}
