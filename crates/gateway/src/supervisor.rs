//! Process-wide wiring of the connection and the inbound pipeline.
//!
//! The [`ConnectionManager`] runs on its own task and pushes raw events into
//! a bounded queue; a single consumer loop takes each event through the
//! [`Pipeline`] before taking the next, so order within a thread is kept.
//! Reconnects are the manager's business; the supervisor only observes
//! them. A logout or a credential persistence failure ends the run.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        sync::{mpsc, watch},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    warelay_channels::{
        DispatchOptions, Dispatcher, FilterContext, JsonlSink, MessageFilter, WebhookSink,
    },
    warelay_config::{PipelineConfig, RelayConfig},
    warelay_whatsapp::{
        ConnectionExit, ConnectionManager, ConnectionOptions, ConnectionState, CredentialStore,
        PairingSink, RetryPolicy, SidecarLaunch, Transport, find_sidecar_dir, start_sidecar,
    },
};

use crate::{
    Result,
    error::Context,
    pipeline::{Pipeline, PipelineStats},
};

/// Queue sizing and shutdown behaviour.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Inbound events buffered between the socket and the pipeline.
    pub queue_capacity: usize,
    /// Budget for draining queued events and in-flight webhooks on shutdown.
    pub shutdown_grace: Duration,
}

impl SupervisorOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// How [`Supervisor::run`] ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Shutdown was requested and the pipeline drained.
    Shutdown,
    /// The device was logged out; the host must re-pair before restarting.
    LoggedOut,
}

pub struct Supervisor {
    manager: ConnectionManager,
    pipeline: Pipeline,
    options: SupervisorOptions,
    sidecar: Option<SidecarLaunch>,
}

impl Supervisor {
    pub fn new(manager: ConnectionManager, pipeline: Pipeline, options: SupervisorOptions) -> Self {
        Self {
            manager,
            pipeline,
            options,
            sidecar: None,
        }
    }

    /// Start (and stop) a local sidecar process around the run.
    #[must_use]
    pub fn with_sidecar(mut self, launch: SidecarLaunch) -> Self {
        self.sidecar = Some(launch);
        self
    }

    /// Build everything from configuration: filter, sinks, dispatcher,
    /// credential store and connection manager. The persisted session is
    /// loaded here, so a corrupt session file fails startup.
    pub async fn from_config(
        config: &RelayConfig,
        transport: Arc<dyn Transport>,
        pairing: Arc<dyn PairingSink>,
    ) -> Result<Self> {
        let filter = MessageFilter::new(FilterContext::from_config(&config.filter)?);

        let store = Arc::new(JsonlSink::new(config.store_path()));
        let webhook = match config.webhook.target() {
            Some(url) => Some(WebhookSink::new(
                url,
                config.webhook.secret.clone(),
                Duration::from_secs(config.webhook.timeout_secs),
            )?),
            None => {
                info!("webhook forwarding disabled");
                None
            },
        };
        let dispatcher = Dispatcher::new(store, webhook, DispatchOptions {
            store_timeout: Duration::from_secs(config.store.timeout_secs),
            max_in_flight: config.webhook.max_in_flight,
        });

        let credentials = Arc::new(CredentialStore::new(
            config.sessions_dir(),
            config.session.id.as_str(),
        )?);
        let session = credentials.load().await?;
        info!(
            session_id = credentials.session_id(),
            paired = session.is_paired(),
            revision = session.revision,
            "session loaded"
        );

        let manager = ConnectionManager::new(
            transport,
            credentials,
            session,
            ConnectionOptions {
                pair_mode: config.transport.pair_mode,
                phone_number: config.transport.phone_number.clone(),
                handshake_timeout: Duration::from_secs(config.transport.handshake_timeout_secs),
                retry: RetryPolicy::from_config(&config.transport.reconnect),
            },
            pairing,
        );

        let mut supervisor = Self::new(
            manager,
            Pipeline::new(filter, dispatcher),
            SupervisorOptions::from_config(&config.pipeline),
        );
        if config.sidecar.auto_start {
            supervisor = supervisor.with_sidecar(SidecarLaunch {
                dir: find_sidecar_dir(config.sidecar.dir.as_deref())?,
                port: config.sidecar.port,
            });
        }
        Ok(supervisor)
    }

    /// Watch connection state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.pipeline.stats()
    }

    /// Run until shutdown, logout or a fatal error. On the way out queued
    /// events and in-flight webhooks get `shutdown_grace` to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<SupervisorExit> {
        let Self {
            mut manager,
            pipeline,
            options,
            sidecar,
        } = self;

        let mut process = match sidecar {
            Some(launch) => Some(start_sidecar(launch).await.context("start sidecar")?),
            None => None,
        };

        let (inbound_tx, mut inbound_rx) = mpsc::channel(options.queue_capacity.max(1));
        let watcher = tokio::spawn(observe_connection(manager.subscribe()));
        let connection = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { manager.run(inbound_tx, shutdown).await }
        });

        info!(
            queue_capacity = options.queue_capacity,
            webhook = pipeline.dispatcher().webhook_enabled(),
            "supervisor started"
        );

        // The queue closes once the connection task has returned and every
        // buffered event was taken.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = inbound_rx.recv() => match event {
                    Some(event) => {
                        pipeline.process(event).await;
                    },
                    None => break,
                },
            }
        }

        let deadline = Instant::now() + options.shutdown_grace;
        inbound_rx.close();
        let drained = tokio::time::timeout_at(deadline, async {
            let mut drained = 0usize;
            while let Some(event) = inbound_rx.recv().await {
                pipeline.process(event).await;
                drained += 1;
            }
            drained
        })
        .await;
        match drained {
            Ok(0) => {},
            Ok(drained) => debug!(drained, "processed queued events during shutdown"),
            Err(_) => warn!("shutdown grace elapsed with inbound events still queued"),
        }

        let exit = connection.await?;
        watcher.abort();

        let remaining = deadline.saturating_duration_since(Instant::now());
        pipeline.dispatcher().drain(remaining).await;

        if let Some(process) = process.as_mut()
            && let Err(e) = process.stop().await
        {
            warn!(error = %e, "failed to stop sidecar");
        }

        let stats = pipeline.stats().snapshot();
        info!(
            received = stats.received,
            accepted = stats.accepted,
            dropped = stats.dropped,
            filtered = stats.filtered,
            store_failures = stats.store_failures,
            "supervisor stopped"
        );

        match exit? {
            ConnectionExit::Shutdown => Ok(SupervisorExit::Shutdown),
            ConnectionExit::LoggedOut => Ok(SupervisorExit::LoggedOut),
        }
    }
}

async fn observe_connection(mut states: watch::Receiver<ConnectionState>) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        match state {
            ConnectionState::ClosedRecoverable => {
                info!("connection closed, reconnect left to the connection manager");
            },
            ConnectionState::ClosedTerminal => {
                error!("connection closed for good; supervisor will stop");
            },
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {
                debug!(%state, "connection state observed");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_pipeline_config() {
        let options = SupervisorOptions::from_config(&PipelineConfig {
            queue_capacity: 8,
            shutdown_grace_secs: 3,
        });
        assert_eq!(options.queue_capacity, 8);
        assert_eq!(options.shutdown_grace, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn invalid_session_id_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RelayConfig::default();
        config.session.id = "../escape".into();
        config.session.dir = Some(dir.path().join("sessions"));
        config.store.path = Some(dir.path().join("dataset.jsonl"));

        let transport: Arc<dyn Transport> =
            Arc::new(warelay_whatsapp::SidecarTransport::new("ws://127.0.0.1:9"));
        let pairing: Arc<dyn PairingSink> =
            Arc::new(warelay_whatsapp::RecordingPairingSink::default());
        let result = Supervisor::from_config(&config, transport, pairing).await;
        assert!(matches!(
            result,
            Err(crate::Error::WhatsApp(
                warelay_whatsapp::Error::InvalidSessionId { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn bad_keyword_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RelayConfig::default();
        config.session.dir = Some(dir.path().join("sessions"));
        config.filter.keyword = Some("(unclosed".into());

        let transport: Arc<dyn Transport> =
            Arc::new(warelay_whatsapp::SidecarTransport::new("ws://127.0.0.1:9"));
        let pairing: Arc<dyn PairingSink> =
            Arc::new(warelay_whatsapp::RecordingPairingSink::default());
        let result = Supervisor::from_config(&config, transport, pairing).await;
        assert!(matches!(result, Err(crate::Error::Pipeline(_))));
    }
}
