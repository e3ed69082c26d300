//! Inbound message shapes.
//!
//! [`RawInboundEvent`] mirrors the WebMessageInfo JSON the Baileys sidecar
//! forwards; only the fields the pipeline reads are typed, everything else in
//! the content union is kept in [`MessageContent::other`].
//! [`NormalizedMessage`] is the canonical record handed to the sinks.

use serde::{Deserialize, Serialize};

/// Server suffix of group thread identifiers.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Returns `true` when `jid` names a group thread.
pub fn is_group_jid(jid: &str) -> bool {
    jid.len() > GROUP_SUFFIX.len() && jid.ends_with(GROUP_SUFFIX)
}

/// One message envelope as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInboundEvent {
    #[serde(default)]
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<RawTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

impl RawInboundEvent {
    /// Thread the message was posted in.
    pub fn thread_id(&self) -> Option<&str> {
        self.key.remote_jid.as_deref().filter(|j| !j.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Author inside a group; absent for one-to-one threads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// The content union of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<MediaMessage>,
    /// Disappearing-message wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_message: Option<Box<WrappedMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_message: Option<Box<WrappedMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2: Option<Box<WrappedMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_with_caption_message: Option<Box<WrappedMessage>>,
    /// Content kinds the pipeline does not interpret (reactions, polls, ...).
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

/// A message nested inside a wrapper kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrappedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
}

/// Recognised media kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Audio,
    Sticker,
}

impl MessageContent {
    /// Follow wrapper kinds down to the message that carries the payload.
    pub fn innermost(&self) -> &MessageContent {
        let mut current = self;
        // Bounded: wrappers nest at most a couple of levels in practice.
        for _ in 0..4 {
            let next = [
                &current.ephemeral_message,
                &current.view_once_message,
                &current.view_once_message_v2,
                &current.document_with_caption_message,
            ]
            .into_iter()
            .flatten()
            .find_map(|w| w.message.as_ref());
            match next {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }

    /// `true` when no content kind at all is present.
    pub fn is_empty(&self) -> bool {
        self.conversation.is_none()
            && self.extended_text_message.is_none()
            && self.image_message.is_none()
            && self.video_message.is_none()
            && self.document_message.is_none()
            && self.audio_message.is_none()
            && self.sticker_message.is_none()
            && self.ephemeral_message.is_none()
            && self.view_once_message.is_none()
            && self.view_once_message_v2.is_none()
            && self.document_with_caption_message.is_none()
            && self.other.is_empty()
    }

    /// Media kind of this content, ignoring wrappers.
    pub fn media_kind(&self) -> Option<MediaKind> {
        if self.image_message.is_some() {
            Some(MediaKind::Image)
        } else if self.document_message.is_some() {
            Some(MediaKind::Document)
        } else if self.video_message.is_some() {
            Some(MediaKind::Video)
        } else if self.audio_message.is_some() {
            Some(MediaKind::Audio)
        } else if self.sticker_message.is_some() {
            Some(MediaKind::Sticker)
        } else {
            None
        }
    }

    /// Whether the record's `hasMedia` flag is set: images, documents and
    /// videos only. Voice notes and stickers are recognised but not flagged.
    pub fn has_media(&self) -> bool {
        matches!(
            self.media_kind(),
            Some(MediaKind::Image | MediaKind::Document | MediaKind::Video)
        )
    }
}

/// Timestamp as the transport encodes it: a plain number, a decimal string,
/// or a protobuf `Long` split into 32-bit halves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Number(f64),
    Text(String),
    Long {
        low: i64,
        high: i64,
        #[serde(default)]
        unsigned: bool,
    },
}

impl RawTimestamp {
    /// Seconds since the epoch, or `None` when the value is unusable.
    pub fn to_seconds(&self) -> Option<f64> {
        let secs = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
            Self::Long {
                low,
                high,
                unsigned,
            } => {
                let low = u64::from(*low as u32);
                if *unsigned {
                    (((*high as u32 as u64) << 32) | low) as f64
                } else {
                    ((*high << 32) | low as i64) as f64
                }
            },
        };
        (secs.is_finite() && secs >= 0.0).then_some(secs)
    }
}

/// Canonical payload handed to the dispatch sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub thread_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub timestamp_seconds: f64,
    pub text: String,
    pub has_media: bool,
    /// Set when the transport omitted the timestamp and wall-clock time was
    /// substituted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timestamp_estimated: bool,
}
