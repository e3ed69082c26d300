//! Connection lifecycle: connect, persist rotations, forward messages and
//! decide between reconnecting and giving up.
//!
//! A close carrying the logged-out status is the only terminal outcome. Every
//! other close, read error or failed handshake is followed by a new attempt
//! with the same persisted identity. Attempts run in an explicit loop.

use std::{sync::Arc, time::Duration};

use {
    tokio::sync::{mpsc, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    warelay_channels::RawInboundEvent,
    warelay_config::{PairMode, ReconnectConfig},
};

#[cfg(feature = "metrics")]
use warelay_metrics::{connection as conn_metrics, counter, gauge};

use crate::{
    Error, Result,
    credentials::{CredentialStore, Session},
    pairing::PairingSink,
    transport::{DisconnectReason, LoginRequest, Transport, TransportEvent, TransportLink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    ClosedRecoverable,
    ClosedTerminal,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::ClosedRecoverable => "closed_recoverable",
            Self::ClosedTerminal => "closed_terminal",
        }
    }

    #[cfg(feature = "metrics")]
    fn gauge_value(self) -> f64 {
        match self {
            Self::Connecting => 0.0,
            Self::Open => 1.0,
            Self::Closing => 2.0,
            Self::ClosedRecoverable => 3.0,
            Self::ClosedTerminal => 4.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`ConnectionManager::run`] ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionExit {
    /// The device was logged out; the session must be re-paired.
    LoggedOut,
    /// Shutdown was requested.
    Shutdown,
}

/// Exponential backoff between failed attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay_ms, config.max_delay_ms)
    }

    /// `base * 2^attempt`, capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(20);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(multiplier)
                .min(self.max_delay_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub pair_mode: PairMode,
    pub phone_number: Option<String>,
    pub handshake_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            pair_mode: PairMode::Qr,
            phone_number: None,
            handshake_timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}

/// How one socket ended.
enum LinkEnd {
    Shutdown,
    LoggedOut(DisconnectReason),
    Dropped {
        reason: DisconnectReason,
        reached_open: bool,
    },
    PersistFailed(Error),
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    session: Session,
    options: ConnectionOptions,
    pairing: Arc<dyn PairingSink>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        session: Session,
        options: ConnectionOptions,
        pairing: Arc<dyn PairingSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            transport,
            store,
            session,
            options,
            pairing,
            state_tx,
        }
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to);
        if from == to {
            return;
        }
        info!(
            session_id = self.store.session_id(),
            %from,
            %to,
            "connection state changed"
        );
        #[cfg(feature = "metrics")]
        gauge!(conn_metrics::STATE).set(to.gauge_value());
    }

    /// Keep the session connected until logout, shutdown or a credential
    /// persistence failure. Messages are pushed into `inbound`; a full queue
    /// holds back the socket reader.
    pub async fn run(
        &mut self,
        inbound: mpsc::Sender<RawInboundEvent>,
        shutdown: CancellationToken,
    ) -> Result<ConnectionExit> {
        let mut attempt: u64 = 0;
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                self.transition(ConnectionState::ClosedRecoverable);
                return Ok(ConnectionExit::Shutdown);
            }

            attempt += 1;
            self.transition(ConnectionState::Connecting);
            #[cfg(feature = "metrics")]
            counter!(conn_metrics::ATTEMPTS_TOTAL).increment(1);

            let login = LoginRequest::from_session(
                self.store.session_id(),
                &self.session,
                self.options.pair_mode,
                self.options.phone_number.clone(),
            );
            let timeout = self.options.handshake_timeout;
            let opened = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.transition(ConnectionState::ClosedRecoverable);
                    return Ok(ConnectionExit::Shutdown);
                },
                opened = tokio::time::timeout(timeout, self.transport.open(login)) => opened,
            };

            let mut link = match opened {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "connection attempt failed");
                    self.transition(ConnectionState::ClosedRecoverable);
                    failures += 1;
                    if !self.wait_before_retry(failures, &shutdown).await {
                        return Ok(ConnectionExit::Shutdown);
                    }
                    continue;
                },
                Err(_) => {
                    let e = Error::HandshakeTimeout { after: timeout };
                    warn!(attempt, error = %e, "connection attempt failed");
                    self.transition(ConnectionState::ClosedRecoverable);
                    failures += 1;
                    if !self.wait_before_retry(failures, &shutdown).await {
                        return Ok(ConnectionExit::Shutdown);
                    }
                    continue;
                },
            };

            let end = self.drive(link.as_mut(), &inbound, &shutdown).await;
            match end {
                LinkEnd::Shutdown => {
                    self.transition(ConnectionState::Closing);
                    close_link(link.as_mut()).await;
                    self.transition(ConnectionState::ClosedRecoverable);
                    return Ok(ConnectionExit::Shutdown);
                },
                LinkEnd::LoggedOut(reason) => {
                    close_link(link.as_mut()).await;
                    self.transition(ConnectionState::ClosedTerminal);
                    error!(
                        session_id = self.store.session_id(),
                        %reason,
                        "device logged out; re-pairing required"
                    );
                    return Ok(ConnectionExit::LoggedOut);
                },
                LinkEnd::PersistFailed(e) => {
                    close_link(link.as_mut()).await;
                    self.transition(ConnectionState::ClosedTerminal);
                    error!(error = %e, "credential rotation could not be persisted");
                    return Err(e);
                },
                LinkEnd::Dropped {
                    reason,
                    reached_open,
                } => {
                    close_link(link.as_mut()).await;
                    self.transition(ConnectionState::ClosedRecoverable);
                    #[cfg(feature = "metrics")]
                    counter!(conn_metrics::RECONNECTS_TOTAL).increment(1);

                    if reached_open {
                        failures = 0;
                        warn!(attempt, %reason, "connection lost, reconnecting");
                    } else {
                        failures += 1;
                        warn!(attempt, %reason, "connection closed before opening");
                        if !self.wait_before_retry(failures, &shutdown).await {
                            return Ok(ConnectionExit::Shutdown);
                        }
                    }
                },
            }
        }
    }

    /// Pump one socket until it ends.
    async fn drive(
        &mut self,
        link: &mut dyn TransportLink,
        inbound: &mpsc::Sender<RawInboundEvent>,
        shutdown: &CancellationToken,
    ) -> LinkEnd {
        let mut reached_open = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return LinkEnd::Shutdown,
                next = link.next_event() => next,
            };
            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    return LinkEnd::Dropped {
                        reason: DisconnectReason::transient(e.to_string()),
                        reached_open,
                    };
                },
                None => {
                    return LinkEnd::Dropped {
                        reason: DisconnectReason::transient("transport ended"),
                        reached_open,
                    };
                },
            };

            match event {
                TransportEvent::Connecting => debug!("transport handshaking"),
                TransportEvent::Open { me } => {
                    reached_open = true;
                    self.transition(ConnectionState::Open);
                    info!(me = me.as_deref().unwrap_or("unknown"), "connected");
                },
                TransportEvent::Closed(reason) if reason.is_logged_out() => {
                    return LinkEnd::LoggedOut(reason);
                },
                TransportEvent::Closed(reason) => {
                    return LinkEnd::Dropped {
                        reason,
                        reached_open,
                    };
                },
                TransportEvent::Credentials(change) => {
                    let revision = match self
                        .store
                        .on_credentials_changed(&mut self.session, change)
                        .await
                    {
                        Ok(revision) => revision,
                        Err(e) => return LinkEnd::PersistFailed(e),
                    };
                    #[cfg(feature = "metrics")]
                    counter!(conn_metrics::CREDENTIAL_WRITES_TOTAL).increment(1);
                    if let Err(e) = link.acknowledge_credentials(revision).await {
                        return LinkEnd::Dropped {
                            reason: DisconnectReason::transient(format!(
                                "credential acknowledgement failed: {e}"
                            )),
                            reached_open,
                        };
                    }
                },
                TransportEvent::Pairing(challenge) => {
                    #[cfg(feature = "metrics")]
                    counter!(conn_metrics::PAIRING_CHALLENGES_TOTAL).increment(1);
                    self.pairing.present(&challenge).await;
                },
                TransportEvent::Messages(batch) => {
                    for event in batch {
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => return LinkEnd::Shutdown,
                            sent = inbound.send(event) => {
                                if sent.is_err() {
                                    warn!("inbound queue closed, stopping connection");
                                    return LinkEnd::Shutdown;
                                }
                            },
                        }
                    }
                },
            }
        }
    }

    /// Sleep before the next attempt. `false` when shutdown interrupted it.
    async fn wait_before_retry(&self, failures: u32, shutdown: &CancellationToken) -> bool {
        let delay = self
            .options
            .retry
            .delay_for_attempt(failures.saturating_sub(1));
        info!(
            failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting after delay"
        );
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

async fn close_link(link: &mut dyn TransportLink) {
    if let Err(e) = link.close().await {
        debug!(error = %e, "error closing transport");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use {async_trait::async_trait, serde_json::json, tokio::time::Instant};

    use {
        super::*,
        crate::{
            credentials::CredentialChange,
            pairing::RecordingPairingSink,
            transport::PairingChallenge,
        },
    };

    enum Step {
        Fail(&'static str),
        Hang,
        Link {
            events: Vec<TransportEvent>,
            hold: bool,
        },
    }

    #[derive(Default)]
    struct Recorder {
        acks: Mutex<Vec<u64>>,
        closes: AtomicUsize,
        fail_close: AtomicBool,
    }

    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        opens: AtomicUsize,
        recorder: Arc<Recorder>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                opens: AtomicUsize::new(0),
                recorder: Arc::new(Recorder::default()),
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, _login: LoginRequest) -> Result<Box<dyn TransportLink>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
            match step {
                Step::Fail(msg) => Err(Error::Message(msg.into())),
                Step::Hang => std::future::pending().await,
                Step::Link { events, hold } => Ok(Box::new(ScriptedLink {
                    events: events.into(),
                    hold,
                    recorder: Arc::clone(&self.recorder),
                })),
            }
        }
    }

    struct ScriptedLink {
        events: VecDeque<TransportEvent>,
        hold: bool,
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl TransportLink for ScriptedLink {
        async fn next_event(&mut self) -> Option<Result<TransportEvent>> {
            match self.events.pop_front() {
                Some(event) => Some(Ok(event)),
                None if self.hold => std::future::pending().await,
                None => None,
            }
        }

        async fn acknowledge_credentials(&mut self, revision: u64) -> Result<()> {
            self.recorder.acks.lock().unwrap().push(revision);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.recorder.closes.fetch_add(1, Ordering::SeqCst);
            if self.recorder.fail_close.load(Ordering::SeqCst) {
                return Err(Error::Message("socket already gone".into()));
            }
            Ok(())
        }
    }

    fn open() -> TransportEvent {
        TransportEvent::Open {
            me: Some("491@s.whatsapp.net".into()),
        }
    }

    fn dropped(code: u16) -> TransportEvent {
        TransportEvent::Closed(DisconnectReason::new(Some(code), "connection lost"))
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            retry: RetryPolicy::new(100, 1_000),
            handshake_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn manager(
        transport: Arc<ScriptedTransport>,
        store: Arc<CredentialStore>,
        session: Session,
    ) -> ConnectionManager {
        ConnectionManager::new(
            transport,
            store,
            session,
            options(),
            Arc::new(RecordingPairingSink::default()),
        )
    }

    async fn paired_store(dir: &std::path::Path) -> (Arc<CredentialStore>, Session) {
        let store = Arc::new(CredentialStore::new(dir, "s1").unwrap());
        let mut session = Session::default();
        let patch = json!({ "registered": true, "me": { "id": "491@s.whatsapp.net" } });
        let serde_json::Value::Object(patch) = patch else {
            unreachable!()
        };
        store
            .on_credentials_changed(&mut session, CredentialChange::Creds(patch))
            .await
            .unwrap();
        (store, session)
    }

    #[rstest::rstest]
    #[case(0, 100)]
    #[case(1, 200)]
    #[case(3, 800)]
    #[case(10, 1_000)]
    #[case(u32::MAX, 1_000)]
    fn retry_delays(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::new(100, 1_000);
        assert_eq!(
            policy.delay_for_attempt(attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[tokio::test]
    async fn recoverable_drops_resume_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = paired_store(dir.path()).await;
        let before = std::fs::read(store.path()).unwrap();

        let transport = ScriptedTransport::new(vec![
            Step::Link {
                events: vec![open(), dropped(428)],
                hold: false,
            },
            Step::Link {
                events: vec![open(), dropped(515)],
                hold: false,
            },
            Step::Link {
                events: vec![open(), dropped(408)],
                hold: false,
            },
            Step::Link {
                events: vec![open()],
                hold: true,
            },
        ]);
        let mut mgr = manager(Arc::clone(&transport), Arc::clone(&store), session);
        let mut state = mgr.subscribe();
        let (tx, _rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { mgr.run(tx, shutdown).await }
        });

        let t = Arc::clone(&transport);
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Open && t.opens() == 4),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(std::fs::read(store.path()).unwrap(), before);
        assert_eq!(transport.recorder.closes.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        assert_eq!(task.await.unwrap().unwrap(), ConnectionExit::Shutdown);
        assert_eq!(*state.borrow(), ConnectionState::ClosedRecoverable);
    }

    #[tokio::test]
    async fn logout_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = paired_store(dir.path()).await;
        let transport = ScriptedTransport::new(vec![
            Step::Link {
                events: vec![open(), TransportEvent::Closed(DisconnectReason::logged_out())],
                hold: false,
            },
            Step::Link {
                events: vec![open()],
                hold: true,
            },
        ]);
        let mut mgr = manager(Arc::clone(&transport), store, session);
        let (tx, _rx) = mpsc::channel(8);

        let exit = mgr.run(tx, CancellationToken::new()).await.unwrap();
        assert_eq!(exit, ConnectionExit::LoggedOut);
        assert_eq!(mgr.state(), ConnectionState::ClosedTerminal);
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn rotation_is_persisted_before_ack() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path(), "s1").unwrap());
        let serde_json::Value::Object(patch) = json!({ "registered": true }) else {
            unreachable!()
        };
        let transport = ScriptedTransport::new(vec![Step::Link {
            events: vec![
                TransportEvent::Credentials(CredentialChange::Creds(patch)),
                open(),
            ],
            hold: true,
        }]);
        let mut mgr = manager(Arc::clone(&transport), Arc::clone(&store), Session::default());
        let mut state = mgr.subscribe();
        let (tx, _rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { mgr.run(tx, shutdown).await }
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Open),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(*transport.recorder.acks.lock().unwrap(), vec![1]);
        let on_disk = store.load().await.unwrap();
        assert_eq!(on_disk.revision, 1);
        assert!(on_disk.is_paired());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn persistence_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("sessions");
        std::fs::write(&blocker, b"").unwrap();
        let store = Arc::new(CredentialStore::new(&blocker, "s1").unwrap());
        let serde_json::Value::Object(patch) = json!({ "registered": true }) else {
            unreachable!()
        };
        let transport = ScriptedTransport::new(vec![Step::Link {
            events: vec![TransportEvent::Credentials(CredentialChange::Creds(patch))],
            hold: true,
        }]);
        let mut mgr = manager(Arc::clone(&transport), store, Session::default());
        let (tx, _rx) = mpsc::channel(8);

        let err = mgr.run(tx, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::CredentialPersistence { .. }));
        assert_eq!(mgr.state(), ConnectionState::ClosedTerminal);
        assert!(transport.recorder.acks.lock().unwrap().is_empty());
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = paired_store(dir.path()).await;
        let transport = ScriptedTransport::new(vec![
            Step::Fail("connection refused"),
            Step::Hang,
            Step::Link {
                events: vec![open()],
                hold: true,
            },
        ]);
        let mut mgr = manager(Arc::clone(&transport), store, session);
        let mut state = mgr.subscribe();
        let (tx, _rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { mgr.run(tx, shutdown).await }
        });

        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        // 100ms after the refusal, 1s handshake timeout, then 200ms.
        assert!(started.elapsed() >= Duration::from_millis(1_300));
        assert_eq!(transport.opens(), 3);

        shutdown.cancel();
        assert_eq!(task.await.unwrap().unwrap(), ConnectionExit::Shutdown);
    }

    #[tokio::test]
    async fn messages_and_pairing_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path(), "s1").unwrap());
        let event = |id: &str| RawInboundEvent {
            key: warelay_channels::MessageKey {
                remote_jid: Some("120@g.us".into()),
                id: Some(id.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let transport = ScriptedTransport::new(vec![Step::Link {
            events: vec![
                TransportEvent::Pairing(PairingChallenge::Qr("2@token".into())),
                open(),
                TransportEvent::Messages(vec![event("A"), event("B")]),
                TransportEvent::Messages(vec![event("C")]),
            ],
            hold: true,
        }]);
        let pairing = Arc::new(RecordingPairingSink::default());
        let mut mgr = ConnectionManager::new(
            transport,
            store,
            Session::default(),
            options(),
            Arc::clone(&pairing) as Arc<dyn PairingSink>,
        );
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { mgr.run(tx, shutdown).await }
        });

        let mut ids = Vec::new();
        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            ids.push(event.key.id.unwrap());
        }
        assert_eq!(ids, ["A", "B", "C"]);
        assert_eq!(
            pairing.challenges(),
            vec![PairingChallenge::Qr("2@token".into())]
        );

        shutdown.cancel();
        assert_eq!(task.await.unwrap().unwrap(), ConnectionExit::Shutdown);
    }

    #[tokio::test]
    async fn shutdown_closes_without_logout() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = paired_store(dir.path()).await;
        let transport = ScriptedTransport::new(vec![Step::Link {
            events: vec![open()],
            hold: true,
        }]);
        let mut mgr = manager(Arc::clone(&transport), Arc::clone(&store), session);
        let mut state = mgr.subscribe();
        let (tx, _rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { mgr.run(tx, shutdown).await }
        });

        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        shutdown.cancel();
        assert_eq!(task.await.unwrap().unwrap(), ConnectionExit::Shutdown);
        assert_eq!(transport.recorder.closes.load(Ordering::SeqCst), 1);
        assert!(store.load().await.unwrap().is_paired());
    }

    #[test]
    fn starts_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path(), "s1").unwrap());
        let mgr = manager(ScriptedTransport::new(Vec::new()), store, Session::default());
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(*mgr.subscribe().borrow(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn close_errors_do_not_change_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = paired_store(dir.path()).await;
        let transport = ScriptedTransport::new(vec![
            Step::Link {
                events: vec![open(), dropped(428)],
                hold: false,
            },
            Step::Link {
                events: vec![open(), TransportEvent::Closed(DisconnectReason::logged_out())],
                hold: false,
            },
        ]);
        transport.recorder.fail_close.store(true, Ordering::SeqCst);
        let mut mgr = manager(Arc::clone(&transport), store, session);
        let (tx, _rx) = mpsc::channel(8);

        let exit = mgr.run(tx, CancellationToken::new()).await.unwrap();
        assert_eq!(exit, ConnectionExit::LoggedOut);
        assert_eq!(transport.opens(), 2);
        assert_eq!(transport.recorder.closes.load(Ordering::SeqCst), 2);
    }
}
