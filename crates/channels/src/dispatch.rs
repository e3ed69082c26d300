//! Fan-out of accepted messages to the durable store and the webhook.
//!
//! The store append is awaited inline; it is the record of truth and its
//! failure is reported, not retried. The webhook runs as a tracked
//! background task so a slow or failing endpoint never stalls the inbound
//! loop. At most `max_in_flight` webhook tasks exist at once; a message
//! arriving while all are busy fails its webhook half immediately instead of
//! queueing behind a hung endpoint. Neither sink's outcome influences the
//! other.

use std::{sync::Arc, time::Duration};

use {
    tokio::{sync::Semaphore, task::JoinHandle, time::Instant},
    tokio_util::task::TaskTracker,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use warelay_metrics::{counter, dispatch as dispatch_metrics, gauge, histogram, labels};

use crate::{Error, message::NormalizedMessage, sink::DurableSink, webhook::WebhookSink};

/// Failure reason when every webhook slot is taken.
pub const WEBHOOK_SATURATED: &str = "webhook saturated";

/// Result of one sink attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed { reason: String },
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }
}

/// Handle on the webhook half of a dispatch.
#[derive(Debug)]
pub enum WebhookDispatch {
    /// Forwarding is disabled or no URL is configured.
    Skipped,
    /// Failed before a request was made.
    Rejected(DispatchOutcome),
    InFlight(JoinHandle<DispatchOutcome>),
}

impl WebhookDispatch {
    /// Wait for the webhook attempt. `None` when it was skipped.
    pub async fn outcome(self) -> Option<DispatchOutcome> {
        match self {
            Self::Skipped => None,
            Self::Rejected(outcome) => Some(outcome),
            Self::InFlight(handle) => Some(
                handle
                    .await
                    .unwrap_or_else(|e| DispatchOutcome::failed(format!("webhook task: {e}"))),
            ),
        }
    }
}

/// Per-message report returned by [`Dispatcher::dispatch`].
#[derive(Debug)]
pub struct DispatchReport {
    pub store: DispatchOutcome,
    pub webhook: WebhookDispatch,
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Deadline for one durable append.
    pub store_timeout: Duration,
    /// Webhook tasks allowed at once; further messages skip the webhook.
    pub max_in_flight: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            max_in_flight: 16,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn DurableSink>,
    webhook: Option<Arc<WebhookSink>>,
    store_timeout: Duration,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DurableSink>,
        webhook: Option<WebhookSink>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            webhook: webhook.map(Arc::new),
            store_timeout: options.store_timeout,
            permits: Arc::new(Semaphore::new(options.max_in_flight.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    pub fn webhook_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    /// Webhook tasks not yet finished.
    pub fn pending_webhooks(&self) -> usize {
        self.tracker.len()
    }

    /// Deliver one message to both sinks.
    pub async fn dispatch(&self, message: NormalizedMessage) -> DispatchReport {
        let store = self.append_durable(&message).await;
        let webhook = self.spawn_webhook(message);
        DispatchReport { store, webhook }
    }

    async fn append_durable(&self, message: &NormalizedMessage) -> DispatchOutcome {
        let sink = self.store.name();
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.store_timeout, self.store.append(message))
            .await
        {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => DispatchOutcome::failed(e),
            Err(_) => DispatchOutcome::failed(Error::Timeout {
                sink,
                after: self.store_timeout,
            }),
        };
        record_delivery(sink, &outcome, started);

        match &outcome {
            DispatchOutcome::Delivered => {
                debug!(sink, message_id = %message.message_id, "message stored");
            },
            DispatchOutcome::Failed { reason } => warn!(
                sink,
                message_id = %message.message_id,
                thread_id = %message.thread_id,
                %reason,
                "durable append failed"
            ),
        }
        outcome
    }

    fn spawn_webhook(&self, message: NormalizedMessage) -> WebhookDispatch {
        let Some(webhook) = self.webhook.clone() else {
            return WebhookDispatch::Skipped;
        };
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            let outcome = DispatchOutcome::failed(WEBHOOK_SATURATED);
            record_delivery("webhook", &outcome, Instant::now());
            warn!(
                url = webhook.url(),
                message_id = %message.message_id,
                in_flight = self.tracker.len(),
                "webhook saturated, skipping delivery"
            );
            return WebhookDispatch::Rejected(outcome);
        };

        let handle = self.tracker.spawn(async move {
            let _permit = permit;
            #[cfg(feature = "metrics")]
            gauge!(dispatch_metrics::WEBHOOK_IN_FLIGHT).increment(1.0);

            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(webhook.timeout(), webhook.deliver(&message)).await {
                    Ok(Ok(())) => DispatchOutcome::Delivered,
                    Ok(Err(e)) => DispatchOutcome::failed(e),
                    Err(_) => DispatchOutcome::failed(Error::Timeout {
                        sink: "webhook",
                        after: webhook.timeout(),
                    }),
                };

            #[cfg(feature = "metrics")]
            gauge!(dispatch_metrics::WEBHOOK_IN_FLIGHT).decrement(1.0);
            record_delivery("webhook", &outcome, started);

            if let DispatchOutcome::Failed { reason } = &outcome {
                warn!(
                    url = webhook.url(),
                    message_id = %message.message_id,
                    %reason,
                    "webhook delivery failed"
                );
            }
            outcome
        });
        WebhookDispatch::InFlight(handle)
    }

    /// Stop accepting webhook work and wait up to `grace` for in-flight
    /// deliveries. Returns `false` when some were abandoned.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight webhook deliveries");
        }
        if tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok()
        {
            true
        } else {
            warn!(
                abandoned = self.tracker.len(),
                "webhook deliveries still running after shutdown grace"
            );
            false
        }
    }
}

#[cfg(feature = "metrics")]
fn record_delivery(sink: &'static str, outcome: &DispatchOutcome, started: Instant) {
    let success = if outcome.is_delivered() {
        "true"
    } else {
        "false"
    };
    counter!(
        dispatch_metrics::DELIVERIES_TOTAL,
        labels::SINK => sink,
        labels::SUCCESS => success
    )
    .increment(1);
    histogram!(dispatch_metrics::DURATION_SECONDS, labels::SINK => sink)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
fn record_delivery(_sink: &'static str, _outcome: &DispatchOutcome, _started: Instant) {}
