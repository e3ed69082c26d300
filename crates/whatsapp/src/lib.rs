//! WhatsApp session lifecycle for warelay.
//!
//! The multi-device protocol is spoken by a Baileys sidecar; this crate owns
//! everything around it: credential persistence ([`credentials`]), the
//! sidecar WebSocket ([`sidecar`]) behind the [`transport::Transport`] seam,
//! optional sidecar process supervision ([`process`]) and the reconnecting
//! [`connection::ConnectionManager`].

pub mod connection;
pub mod credentials;
pub mod error;
pub mod pairing;
pub mod process;
pub mod sidecar;
pub mod transport;
pub mod types;

pub use {
    connection::{
        ConnectionExit, ConnectionManager, ConnectionOptions, ConnectionState, RetryPolicy,
    },
    credentials::{CredentialChange, CredentialStore, Session},
    error::{Error, Result},
    pairing::{PairingSink, RecordingPairingSink, StderrPairingSink},
    process::{SidecarLaunch, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::SidecarTransport,
    transport::{
        DisconnectReason, LOGGED_OUT_STATUS, LoginRequest, PairingChallenge, Transport,
        TransportEvent, TransportLink,
    },
};
