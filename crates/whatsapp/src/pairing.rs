//! Hand-off of pairing challenges to whoever renders them.

use std::{io::Write, sync::Mutex};

use {async_trait::async_trait, tracing::info};

use crate::transport::PairingChallenge;

/// Receives pairing challenges. Rendering (QR art, prompts) is the
/// implementor's business; the connection only forwards the raw token.
#[async_trait]
pub trait PairingSink: Send + Sync {
    async fn present(&self, challenge: &PairingChallenge);
}

/// Logs the challenge and writes the raw token to stderr.
#[derive(Debug, Default)]
pub struct StderrPairingSink;

#[async_trait]
impl PairingSink for StderrPairingSink {
    async fn present(&self, challenge: &PairingChallenge) {
        info!(kind = challenge.kind(), "pairing challenge received");
        let mut stderr = std::io::stderr().lock();
        let _ = match challenge {
            PairingChallenge::Qr(token) => writeln!(stderr, "pair with QR token: {token}"),
            PairingChallenge::Code(code) => {
                writeln!(stderr, "enter pairing code on your phone: {code}")
            },
        };
    }
}

/// Keeps every challenge; handy for tests and status endpoints.
#[derive(Debug, Default)]
pub struct RecordingPairingSink {
    seen: Mutex<Vec<PairingChallenge>>,
}

impl RecordingPairingSink {
    pub fn challenges(&self) -> Vec<PairingChallenge> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn latest(&self) -> Option<PairingChallenge> {
        self.seen.lock().ok().and_then(|v| v.last().cloned())
    }
}

#[async_trait]
impl PairingSink for RecordingPairingSink {
    async fn present(&self, challenge: &PairingChallenge) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(challenge.clone());
        }
    }
}
