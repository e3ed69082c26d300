//! Group-only routing of raw inbound events.

use crate::message::{RawInboundEvent, is_group_jid};

/// An event that passed routing, paired with its group thread id.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub event: RawInboundEvent,
    pub thread_id: String,
}

/// Why an event was not routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The envelope carries no content (receipts, protocol stubs).
    NoContent,
    /// The key has no thread identifier.
    NoThread,
    /// The thread is a direct chat, broadcast or status update.
    NotGroup,
    /// Echo of a message this account sent itself.
    FromSelf,
    /// The key has no message id.
    NoMessageId,
}

impl DropReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoContent => "no_content",
            Self::NoThread => "no_thread",
            Self::NotGroup => "not_group",
            Self::FromSelf => "from_self",
            Self::NoMessageId => "no_message_id",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Route an event, reporting the reason when it is dropped.
pub fn classify(event: RawInboundEvent) -> Result<RoutedEvent, DropReason> {
    match &event.message {
        Some(content) if !content.is_empty() => {},
        _ => return Err(DropReason::NoContent),
    }
    let thread_id = match event.thread_id() {
        Some(jid) => jid.to_string(),
        None => return Err(DropReason::NoThread),
    };
    if !is_group_jid(&thread_id) {
        return Err(DropReason::NotGroup);
    }
    if event.key.from_me == Some(true) {
        return Err(DropReason::FromSelf);
    }
    if event.key.id.as_deref().is_none_or(str::is_empty) {
        return Err(DropReason::NoMessageId);
    }
    Ok(RoutedEvent { event, thread_id })
}

/// Keep only group messages; everything else yields `None`.
pub fn route(event: RawInboundEvent) -> Option<RoutedEvent> {
    classify(event).ok()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::message::{MessageContent, MessageKey},
        rstest::rstest,
    };

    fn event(jid: Option<&str>, text: Option<&str>) -> RawInboundEvent {
        RawInboundEvent {
            key: MessageKey {
                remote_jid: jid.map(String::from),
                from_me: Some(false),
                id: Some("ABC".into()),
                participant: Some("1@s.whatsapp.net".into()),
            },
            message: text.map(|t| MessageContent {
                conversation: Some(t.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn group_message_is_routed() {
        let routed = route(event(Some("120@g.us"), Some("hi"))).unwrap();
        assert_eq!(routed.thread_id, "120@g.us");
        assert_eq!(routed.event.key.id.as_deref(), Some("ABC"));
    }

    #[rstest]
    #[case(Some("4915112345678@s.whatsapp.net"), Some("hi"), DropReason::NotGroup)]
    #[case(Some("status@broadcast"), Some("hi"), DropReason::NotGroup)]
    #[case(None, Some("hi"), DropReason::NoThread)]
    #[case(Some(""), Some("hi"), DropReason::NoThread)]
    #[case(Some("120@g.us"), None, DropReason::NoContent)]
    fn dropped(
        #[case] jid: Option<&str>,
        #[case] text: Option<&str>,
        #[case] reason: DropReason,
    ) {
        assert_eq!(classify(event(jid, text)), Err(reason));
    }

    #[test]
    fn empty_content_is_dropped() {
        let mut e = event(Some("120@g.us"), None);
        e.message = Some(MessageContent::default());
        assert_eq!(classify(e), Err(DropReason::NoContent));
    }

    #[test]
    fn own_messages_are_dropped() {
        let mut e = event(Some("120@g.us"), Some("echo"));
        e.key.from_me = Some(true);
        assert_eq!(classify(e), Err(DropReason::FromSelf));
    }

    #[test]
    fn missing_message_id_is_dropped() {
        let mut e = event(Some("120@g.us"), Some("hi"));
        e.key.id = None;
        assert_eq!(classify(e), Err(DropReason::NoMessageId));
    }
}
