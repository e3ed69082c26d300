//! Inbound pipeline for group messages.
//!
//! Raw transport events flow through [`router`] (groups only), [`filter`]
//! (allowlist and keyword), [`normalize`] and finally [`dispatch`], which
//! writes the durable store and forwards to the webhook.

pub mod dispatch;
pub mod error;
pub mod filter;
pub mod message;
pub mod normalize;
pub mod router;
pub mod sink;
pub mod webhook;

pub use {
    dispatch::{DispatchOptions, DispatchOutcome, DispatchReport, Dispatcher, WebhookDispatch},
    error::{Error, Result},
    filter::{FilterContext, MessageFilter, Verdict},
    message::{
        GROUP_SUFFIX, MediaKind, MessageContent, MessageKey, NormalizedMessage, RawInboundEvent,
        RawTimestamp, is_group_jid,
    },
    normalize::{normalize, normalize_at},
    router::{DropReason, RoutedEvent, classify, route},
    sink::{DurableSink, JsonlSink},
    webhook::{SIGNATURE_HEADER, WEBHOOK_EVENT, WebhookEnvelope, WebhookSink},
};
