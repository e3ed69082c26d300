//! JSON frames exchanged with the Baileys sidecar over WebSocket.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Frames sent by the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Connection {
        connection: ConnectionPhase,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
        /// Our own JID once the socket is open.
        #[serde(default)]
        me: Option<String>,
    },
    CredsUpdate {
        creds: serde_json::Map<String, serde_json::Value>,
    },
    /// Signal key material; a `null` value deletes the entry.
    KeysUpdate {
        keys: serde_json::Map<String, serde_json::Value>,
    },
    Qr {
        qr: String,
    },
    PairingCode {
        code: String,
    },
    MessagesUpsert {
        #[serde(default)]
        upsert_type: Option<String>,
        #[serde(default)]
        messages: Vec<serde_json::Value>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// Frames sent to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// First frame on every socket: start a Baileys session from the
    /// persisted state.
    Login {
        session_id: String,
        creds: serde_json::Value,
        keys: BTreeMap<String, serde_json::Value>,
        pair_mode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    /// Sent once a credential rotation is on disk.
    CredsPersisted { revision: u64 },
}
