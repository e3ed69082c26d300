//! Per-event processing: route, filter, normalize, dispatch.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    tracing::debug,
    warelay_channels::{
        DispatchReport, Dispatcher, DropReason, MessageFilter, RawInboundEvent, Verdict, classify,
        normalize,
    },
};

#[cfg(feature = "metrics")]
use warelay_metrics::{counter, inbound, labels};

/// Running totals for the inbound pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
    accepted: AtomicU64,
    store_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    /// Rejected by the router (no content, not a group, own message, ...).
    pub dropped: u64,
    /// Rejected by the allowlist or keyword filter.
    pub filtered: u64,
    pub accepted: u64,
    pub store_failures: u64,
}

impl StatsSnapshot {
    /// Events that have left the pipeline one way or another.
    pub fn settled(&self) -> u64 {
        self.dropped + self.filtered + self.accepted
    }
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one event.
#[derive(Debug)]
pub enum Processed {
    Dropped(DropReason),
    Filtered(Verdict),
    Dispatched(DispatchReport),
}

pub struct Pipeline {
    filter: MessageFilter,
    dispatcher: Dispatcher,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(filter: MessageFilter, dispatcher: Dispatcher) -> Self {
        Self {
            filter,
            dispatcher,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Take one event all the way through. The allowlist is checked before
    /// normalization; the keyword needs the extracted text and runs after.
    pub async fn process(&self, event: RawInboundEvent) -> Processed {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!(inbound::RECEIVED_TOTAL).increment(1);

        let routed = match classify(event) {
            Ok(routed) => routed,
            Err(reason) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(inbound::DROPPED_TOTAL, labels::REASON => reason.as_str()).increment(1);
                debug!(reason = reason.as_str(), "inbound event dropped");
                return Processed::Dropped(reason);
            },
        };

        if !self.filter.allows_thread(&routed.thread_id) {
            return self.reject(&routed.thread_id, Verdict::ThreadNotAllowed);
        }

        let message = normalize(&routed);
        let verdict = self.filter.evaluate(&message.thread_id, &message.text);
        if !verdict.is_accepted() {
            return self.reject(&message.thread_id, verdict);
        }

        #[cfg(feature = "metrics")]
        {
            counter!(inbound::ACCEPTED_TOTAL).increment(1);
            if message.timestamp_estimated {
                counter!(inbound::TIMESTAMP_ESTIMATED_TOTAL).increment(1);
            }
        }
        debug!(
            thread_id = %message.thread_id,
            message_id = %message.message_id,
            has_media = message.has_media,
            "message accepted"
        );

        let report = self.dispatcher.dispatch(message).await;
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        if !report.store.is_delivered() {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
        }
        Processed::Dispatched(report)
    }

    fn reject(&self, thread_id: &str, verdict: Verdict) -> Processed {
        self.stats.filtered.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!(inbound::FILTERED_TOTAL, labels::REASON => verdict.as_str()).increment(1);
        debug!(thread_id, reason = verdict.as_str(), "message filtered");
        Processed::Filtered(verdict)
    }
}
