//! Durable session credentials.
//!
//! One JSON document per session at `<sessions_dir>/<session_id>/session.json`.
//! Every write goes through a temp file, `fsync` and rename under an advisory
//! lock, so a crash mid-write leaves the previous revision intact.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use {
    fd_lock::RwLock,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::{debug, info},
};

use crate::{Error, Result, error::Context};

pub const SESSION_FILE: &str = "session.json";
const LOCK_FILE: &str = "session.lock";

/// Credential and key material for one linked device.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub creds: Map<String, Value>,
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
    /// Incremented once per persisted rotation.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Session {
    /// `true` once the device has completed pairing.
    pub fn is_paired(&self) -> bool {
        self.creds.get("registered").and_then(Value::as_bool) == Some(true)
            || self.creds.get("me").is_some_and(|me| !me.is_null())
    }

    /// Our own JID as recorded by the last pairing, if any.
    pub fn me(&self) -> Option<&str> {
        self.creds
            .get("me")
            .and_then(|me| me.get("id"))
            .and_then(Value::as_str)
    }

    fn apply(&mut self, change: CredentialChange) {
        match change {
            CredentialChange::Creds(patch) => {
                for (k, v) in patch {
                    self.creds.insert(k, v);
                }
            },
            CredentialChange::Keys(patch) => {
                for (k, v) in patch {
                    if v.is_null() {
                        self.keys.remove(&k);
                    } else {
                        self.keys.insert(k, v);
                    }
                }
            },
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("creds", &"[REDACTED]")
            .field("keys", &self.keys.len())
            .field("revision", &self.revision)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A rotation reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialChange {
    /// Partial credential object, shallow-merged.
    Creds(Map<String, Value>),
    /// Signal keys; a `null` value deletes the entry.
    Keys(Map<String, Value>),
}

pub struct CredentialStore {
    sessions_dir: PathBuf,
    session_id: String,
}

impl CredentialStore {
    /// `session_id` must be a single, non-empty path segment.
    pub fn new(sessions_dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self> {
        let session_id = session_id.into();
        let reason = if session_id.trim().is_empty() {
            Some("must not be empty")
        } else if session_id.contains(['/', '\\']) || session_id == "." || session_id == ".." {
            Some("must be a single path segment")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Error::InvalidSessionId {
                id: session_id,
                reason,
            });
        }
        Ok(Self {
            sessions_dir: sessions_dir.into(),
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_dir(&self) -> PathBuf {
        self.sessions_dir.join(&self.session_id)
    }

    pub fn path(&self) -> PathBuf {
        self.session_dir().join(SESSION_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Load the persisted session, or a fresh unpaired one when none exists.
    /// The fresh session is not written until its first rotation.
    pub async fn load(&self) -> Result<Session> {
        let path = self.path();
        let session_id = self.session_id.clone();
        tokio::task::spawn_blocking(move || -> Result<Session> {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(%session_id, "no persisted session, starting unpaired");
                    return Ok(Session::default());
                },
                Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
            };
            let session: Session = serde_json::from_slice(&bytes)
                .map_err(|source| Error::CorruptSession { path, source })?;
            debug!(
                %session_id,
                revision = session.revision,
                paired = session.is_paired(),
                "loaded session"
            );
            Ok(session)
        })
        .await?
    }

    /// Apply a rotation and flush it to disk before returning.
    ///
    /// On failure `session` is left unchanged and the error is
    /// [`Error::CredentialPersistence`]. Returns the new revision.
    pub async fn on_credentials_changed(
        &self,
        session: &mut Session,
        change: CredentialChange,
    ) -> Result<u64> {
        let mut next = session.clone();
        next.apply(change);
        next.revision += 1;
        next.updated_at = warelay_common::time::unix_now();

        self.persist(&next)
            .await
            .map_err(Error::credential_persistence)?;
        debug!(
            session_id = %self.session_id,
            revision = next.revision,
            "credentials persisted"
        );
        let revision = next.revision;
        *session = next;
        Ok(revision)
    }

    /// Atomically write `session`.
    pub async fn persist(&self, session: &Session) -> Result<()> {
        let dir = self.session_dir();
        let bytes = serde_json::to_vec_pretty(session)?;
        tokio::task::spawn_blocking(move || write_atomic(&dir, &bytes)).await?
    }

    /// Delete the persisted session. Returns `false` when there was none.
    pub async fn clear(&self) -> Result<bool> {
        let dir = self.session_dir();
        let session_id = self.session_id.clone();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(%session_id, path = %dir.display(), "session cleared");
                    Ok(true)
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e).with_context(|| format!("remove {}", dir.display())),
            }
        })
        .await?
    }
}

fn write_atomic(dir: &Path, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write().map_err(|e| Error::Lock {
        message: e.to_string(),
    })?;

    let tmp = dir.join(format!("{SESSION_FILE}.tmp"));
    {
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&tmp)
            .with_context(|| format!("open {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(SESSION_FILE)).context("replace session file")?;

    // Make the rename itself durable.
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;

    Ok(())
}
