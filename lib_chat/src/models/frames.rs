//! # Transport Frames
//!
//! The two directions of the wire protocol:
//!
//! - outbound [`ClientFrame`]s, tagged by `type`
//!   (`{"type":"subscribe","channelName":"chat:42","userId":"u1"}`);
//! - inbound event frames `{"event": "<kind>", "data": {...}}`, optionally carrying
//!   the channel they were broadcast on, decoded by [`decode_frame`] into an
//!   [`InboundEvent`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::message::ChatMessage;
use super::typing::{MemberStatus, TypingStart, TypingStop};

/// Channel name for a conversation or chat channel id, as used by the
/// broadcast side (`chat:<id>`).
pub fn channel_name(conversation_id: &str) -> String {
    format!("chat:{}", conversation_id)
}

/// Frames the client sends to the delivery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Start receiving broadcasts on a channel.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Channel to join.
        channel_name: String,
        /// Presence identity, if the consumer wants to be tracked as present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// Extra presence metadata (display name, avatar, ...).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_info: Option<Value>,
    },
    /// Stop receiving broadcasts on a channel.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Channel to leave.
        channel_name: String,
    },
}

impl ClientFrame {
    /// The channel the frame targets.
    pub fn channel_name(&self) -> &str {
        match self {
            ClientFrame::Subscribe { channel_name, .. } => channel_name,
            ClientFrame::Unsubscribe { channel_name } => channel_name,
        }
    }
}

/// Inbound event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `new-message`
    NewMessage,
    /// `message-update`
    MessageUpdate,
    /// `message-delete`
    MessageDelete,
    /// `member-typing`
    MemberTyping,
    /// `member-stop-typing`
    MemberStopTyping,
    /// `member-status-update`
    MemberStatusUpdate,
}

impl EventKind {
    /// Every kind, in wire-table order.
    pub const ALL: [EventKind; 6] = [
        EventKind::NewMessage,
        EventKind::MessageUpdate,
        EventKind::MessageDelete,
        EventKind::MemberTyping,
        EventKind::MemberStopTyping,
        EventKind::MemberStatusUpdate,
    ];

    /// The wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "new-message",
            EventKind::MessageUpdate => "message-update",
            EventKind::MessageDelete => "message-delete",
            EventKind::MemberTyping => "member-typing",
            EventKind::MemberStopTyping => "member-stop-typing",
            EventKind::MemberStatusUpdate => "member-status-update",
        }
    }

    /// Parse a wire tag.
    pub fn from_wire(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Whether events of this kind belong to the message cache.
    pub fn is_message_event(&self) -> bool {
        matches!(
            self,
            EventKind::NewMessage | EventKind::MessageUpdate | EventKind::MessageDelete
        )
    }

    /// Whether events of this kind belong to the typing indicator.
    pub fn is_typing_event(&self) -> bool {
        matches!(self, EventKind::MemberTyping | EventKind::MemberStopTyping)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A message was created.
    NewMessage(ChatMessage),
    /// A message was edited.
    MessageUpdate(ChatMessage),
    /// A message was soft-deleted; the payload is the tombstone record.
    MessageDelete(ChatMessage),
    /// Someone started typing.
    MemberTyping(TypingStart),
    /// Someone stopped typing.
    MemberStopTyping(TypingStop),
    /// A member's presence status changed.
    MemberStatusUpdate(MemberStatus),
}

impl ChatEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ChatEvent::NewMessage(_) => EventKind::NewMessage,
            ChatEvent::MessageUpdate(_) => EventKind::MessageUpdate,
            ChatEvent::MessageDelete(_) => EventKind::MessageDelete,
            ChatEvent::MemberTyping(_) => EventKind::MemberTyping,
            ChatEvent::MemberStopTyping(_) => EventKind::MemberStopTyping,
            ChatEvent::MemberStatusUpdate(_) => EventKind::MemberStatusUpdate,
        }
    }
}

/// An event together with the channel it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Broadcast channel (`chat:<id>`), when the endpoint includes it.
    pub channel: Option<String>,
    /// The decoded payload.
    pub event: ChatEvent,
}

impl InboundEvent {
    /// Build an event for a channel.
    pub fn on_channel(channel: impl Into<String>, event: ChatEvent) -> Self {
        Self {
            channel: Some(channel.into()),
            event,
        }
    }

    /// The kind of the wrapped event.
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or missing the `event` tag.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The `event` tag is not one this client consumes.
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    /// The `data` payload does not match the event type.
    #[error("Invalid '{event}' payload: {source}")]
    Payload {
        /// Wire tag of the event.
        event: &'static str,
        /// Underlying serde failure.
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default, alias = "channelName")]
    channel: Option<String>,
}

/// Decode one text frame into a typed event.
pub fn decode_frame(text: &str) -> Result<InboundEvent, DecodeError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let kind =
        EventKind::from_wire(&raw.event).ok_or_else(|| DecodeError::UnknownEvent(raw.event.clone()))?;

    let event = match kind {
        EventKind::NewMessage => ChatEvent::NewMessage(payload(kind, raw.data)?),
        EventKind::MessageUpdate => ChatEvent::MessageUpdate(payload(kind, raw.data)?),
        EventKind::MessageDelete => ChatEvent::MessageDelete(payload(kind, raw.data)?),
        EventKind::MemberTyping => ChatEvent::MemberTyping(payload(kind, raw.data)?),
        EventKind::MemberStopTyping => ChatEvent::MemberStopTyping(payload(kind, raw.data)?),
        EventKind::MemberStatusUpdate => ChatEvent::MemberStatusUpdate(payload(kind, raw.data)?),
    };

    Ok(InboundEvent {
        channel: raw.channel,
        event,
    })
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload {
        event: kind.as_str(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_frame_uses_camel_case_and_omits_empty_presence() {
        let frame = ClientFrame::Subscribe {
            channel_name: "chat:42".to_string(),
            user_id: None,
            user_info: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({ "type": "subscribe", "channelName": "chat:42" }));

        let frame = ClientFrame::Subscribe {
            channel_name: "chat:42".to_string(),
            user_id: Some("u1".to_string()),
            user_info: Some(json!({ "name": "Ada" })),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["userInfo"]["name"], "Ada");
    }

    #[test]
    fn decodes_new_message_with_channel() {
        let text = json!({
            "channel": "chat:42",
            "event": "new-message",
            "data": {
                "id": "m1",
                "content": "hello",
                "userId": "u1",
                "username": "ada",
                "timestamp": "2024-05-01T10:00:00Z",
                "member": { "id": "mem1", "role": "GUEST", "user": { "id": "u1", "name": "ada" } }
            }
        })
        .to_string();

        let event = decode_frame(&text).unwrap();
        assert_eq!(event.channel.as_deref(), Some("chat:42"));
        assert_eq!(event.kind(), EventKind::NewMessage);
        match event.event {
            ChatEvent::NewMessage(message) => {
                assert_eq!(message.id, "m1");
                assert!(!message.deleted);
                assert_eq!(message.member.unwrap().user.unwrap().name, "ada");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn decodes_typing_with_authoritative_list() {
        let text = r#"{"event":"member-typing","data":{"userId":"u1","username":"ada","typingUsers":[{"userId":"u1","username":"ada"},{"userId":"u2","username":"bob"}]}}"#;
        let event = decode_frame(text).unwrap();
        match event.event {
            ChatEvent::MemberTyping(start) => assert_eq!(start.typing_users.unwrap().len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_unknown_and_mistyped_frames() {
        assert!(matches!(decode_frame("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode_frame(r#"{"event":"server-restart","data":{}}"#),
            Err(DecodeError::UnknownEvent(tag)) if tag == "server-restart"
        ));
        assert!(matches!(
            decode_frame(r#"{"event":"new-message","data":{"content":"no id"}}"#),
            Err(DecodeError::Payload { event: "new-message", .. })
        ));
    }

    #[test]
    fn event_kind_round_trips_through_wire_tag() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_wire("nope"), None);
    }
}
