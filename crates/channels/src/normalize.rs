//! Reduce a routed event to a [`NormalizedMessage`].

use crate::{
    message::{MessageContent, NormalizedMessage, RawInboundEvent},
    router::RoutedEvent,
};

/// Normalize using the wall clock for missing timestamps.
pub fn normalize(routed: &RoutedEvent) -> NormalizedMessage {
    normalize_at(routed, warelay_common::time::unix_now_secs())
}

/// Normalize with an explicit fallback time, in seconds since the epoch.
pub fn normalize_at(routed: &RoutedEvent, now_secs: f64) -> NormalizedMessage {
    let event = &routed.event;
    let content = event.message.as_ref().map(MessageContent::innermost);

    let (timestamp_seconds, timestamp_estimated) = match event
        .message_timestamp
        .as_ref()
        .and_then(|ts| ts.to_seconds())
    {
        Some(secs) => (secs, false),
        None => (now_secs, true),
    };

    NormalizedMessage {
        thread_id: routed.thread_id.clone(),
        message_id: event.key.id.clone().unwrap_or_default(),
        sender_id: sender_id(event, &routed.thread_id),
        timestamp_seconds,
        text: content.map(extract_text).unwrap_or_default(),
        has_media: content.is_some_and(MessageContent::has_media),
        timestamp_estimated,
    }
}

/// Group participant, falling back to the thread id.
fn sender_id(event: &RawInboundEvent, thread_id: &str) -> String {
    event
        .key
        .participant
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(thread_id)
        .to_string()
}

/// Plain text, then extended text, then a media caption. Empty strings fall
/// through to the next source.
fn extract_text(content: &MessageContent) -> String {
    let non_empty = |s: &Option<String>| s.as_deref().filter(|t| !t.is_empty()).map(String::from);

    non_empty(&content.conversation)
        .or_else(|| {
            content
                .extended_text_message
                .as_ref()
                .and_then(|m| non_empty(&m.text))
        })
        .or_else(|| {
            [
                &content.image_message,
                &content.video_message,
                &content.document_message,
            ]
            .into_iter()
            .flatten()
            .find_map(|m| non_empty(&m.caption))
        })
        .unwrap_or_default()
}
