use anyhow::Result;
use lib_chat::core::ConnectionStatus;
use lib_chat::{ChatEvent, ChatMessage, ChatSession, EventKind, InboundEvent, Presence};
use serde_json::json;
use tokio::sync::watch;

/// Cache key used for a watched channel id.
pub fn cache_key(channel_id: &str) -> String {
    format!("channel:{}", channel_id)
}

/// Presence announced on subscribe, if a user id is configured.
pub fn presence(user_id: Option<&str>, username: Option<&str>) -> Option<Presence> {
    let user_id = user_id?.trim();
    if user_id.is_empty() {
        return None;
    }
    let presence = Presence::new(user_id);
    Some(match username {
        Some(name) => presence.with_info(json!({ "username": name })),
        None => presence,
    })
}

fn author(message: &ChatMessage) -> &str {
    if message.username.is_empty() {
        &message.user_id
    } else {
        &message.username
    }
}

/// One log line for an inbound event.
pub fn describe(event: &InboundEvent) -> String {
    let channel = event.channel.as_deref().unwrap_or("*");
    match &event.event {
        ChatEvent::NewMessage(message) => {
            let attachment = message
                .file_name
                .as_deref()
                .map(|name| format!(" [file: {}]", name))
                .unwrap_or_default();
            format!("[{}] {}: {}{}", channel, author(message), message.content, attachment)
        }
        ChatEvent::MessageUpdate(message) => {
            format!("[{}] {} edited {}: {}", channel, author(message), message.id, message.content)
        }
        ChatEvent::MessageDelete(message) => format!("[{}] {} deleted {}", channel, author(message), message.id),
        ChatEvent::MemberTyping(start) => match &start.typing_users {
            Some(users) => {
                let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
                format!("[{}] typing: {}", channel, names.join(", "))
            }
            None => format!("[{}] {} is typing", channel, start.username),
        },
        ChatEvent::MemberStopTyping(stop) => format!("[{}] {} stopped typing", channel, stop.user_id),
        ChatEvent::MemberStatusUpdate(status) => format!("{} is now {}", status.user_id, status.status),
    }
}

/// Log every event kind the session delivers.
pub fn register_handlers(session: &ChatSession) -> Result<()> {
    for kind in EventKind::ALL {
        session.add_handler(kind, move |event| {
            if kind.is_typing_event() {
                log::debug!("{}", describe(event));
            } else {
                log::info!("{}", describe(event));
            }
        })?;
    }
    Ok(())
}

/// Log connection status changes until the session goes away.
pub async fn log_status(mut updates: watch::Receiver<ConnectionStatus>) {
    let mut previous = updates.borrow_and_update().clone();
    while updates.changed().await.is_ok() {
        let status = updates.borrow_and_update().clone();
        if status.state != previous.state || status.delivery_mode != previous.delivery_mode {
            log::info!(
                "Connection {} ({:?}, {} connection(s), {} failed attempt(s))",
                status.state,
                status.delivery_mode,
                status.connection_count,
                status.reconnect_attempts
            );
        }
        if status.session_expired && !previous.session_expired {
            log::error!(
                "Session expired: {}. Sign in again to resume.",
                status.last_error.as_deref().unwrap_or("credentials refused")
            );
        }
        previous = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_chat::models::decode_frame;

    #[test]
    fn presence_needs_a_user_id() {
        assert!(presence(None, Some("ada")).is_none());
        assert!(presence(Some("  "), None).is_none());

        let presence = presence(Some("u1"), Some("ada")).unwrap();
        assert_eq!(presence.user_id, "u1");
        assert_eq!(presence.user_info, Some(json!({ "username": "ada" })));
    }

    #[test]
    fn describes_messages_and_typing() {
        let event = decode_frame(
            r#"{"channel":"chat:42","event":"new-message","data":{"id":"m1","content":"hi","userId":"u1","username":"ada","fileName":"a.png","timestamp":"2024-05-01T10:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(describe(&event), "[chat:42] ada: hi [file: a.png]");

        let event = decode_frame(
            r#"{"event":"member-typing","data":{"userId":"u1","username":"ada","typingUsers":[{"userId":"u1","username":"ada"},{"userId":"u2","username":"bob"}]}}"#,
        )
        .unwrap();
        assert_eq!(describe(&event), "[*] typing: ada, bob");

        let event = decode_frame(r#"{"event":"member-status-update","data":{"userId":"u2","status":"idle"}}"#).unwrap();
        assert_eq!(describe(&event), "u2 is now idle");
    }

    #[test]
    fn cache_keys_are_prefixed() {
        assert_eq!(cache_key("42"), "channel:42");
    }
}
