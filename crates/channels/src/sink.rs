//! Durable storage of accepted messages.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use {async_trait::async_trait, fd_lock::RwLock};

use crate::{Error, Result, error::Context, message::NormalizedMessage};

/// Append-only store that must record every accepted message.
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str {
        "store"
    }

    async fn append(&self, message: &NormalizedMessage) -> Result<()>;
}

/// JSON Lines file, one message per line, guarded by an advisory lock so
/// several relays may share the file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DurableSink for JsonlSink {
    async fn append(&self, message: &NormalizedMessage) -> Result<()> {
        let path = self.path.clone();
        let line = serde_json::to_string(message)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open {}", path.display()))?;
            let mut lock = RwLock::new(file);
            let mut guard = lock.write().map_err(Error::lock_failed)?;
            writeln!(*guard, "{line}")?;
            guard.sync_data()?;
            Ok(())
        })
        .await?
    }
}
