//! # Typing Aggregator
//!
//! Per-channel set of users currently typing. A `member-typing` or
//! `member-stop-typing` frame either carries the full list for the channel, which
//! replaces the local set, or names a single user, which is added or removed.
//! There is no local expiry: an entry stays until a stop frame (or a full list
//! without it) arrives, or the channel is cleared.

use std::collections::HashMap;

use crate::models::{ChatEvent, InboundEvent, TypingStart, TypingStop, TypingUser};

/// Typing state for every channel the session has heard about.
#[derive(Debug, Default)]
pub struct TypingAggregator {
    channels: HashMap<String, Vec<TypingUser>>,
}

impl TypingAggregator {
    /// An empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a typing-start payload. Returns whether the channel's set changed.
    pub fn apply_start(&mut self, channel: &str, start: &TypingStart) -> bool {
        let users = self.channels.entry(channel.to_string()).or_default();
        match &start.typing_users {
            Some(list) => replace(users, list),
            None => {
                if users.iter().any(|u| u.user_id == start.user_id) {
                    false
                } else {
                    users.push(TypingUser {
                        user_id: start.user_id.clone(),
                        username: start.username.clone(),
                    });
                    true
                }
            }
        }
    }

    /// Apply a typing-stop payload. Returns whether the channel's set changed.
    pub fn apply_stop(&mut self, channel: &str, stop: &TypingStop) -> bool {
        let changed = match &stop.remaining_typing_users {
            Some(list) => replace(self.channels.entry(channel.to_string()).or_default(), list),
            None => match self.channels.get_mut(channel) {
                Some(users) => {
                    let before = users.len();
                    users.retain(|u| u.user_id != stop.user_id);
                    users.len() != before
                }
                None => false,
            },
        };
        if self.channels.get(channel).is_some_and(Vec::is_empty) {
            self.channels.remove(channel);
        }
        changed
    }

    /// Apply a typing event. A frame without a channel applies to each of
    /// `untagged_channels` (the channels the session is subscribed to).
    /// Non-typing events are ignored.
    pub fn apply_event(&mut self, event: &InboundEvent, untagged_channels: &[String]) -> bool {
        let channels: Vec<&str> = match event.channel.as_deref() {
            Some(channel) => vec![channel],
            None => untagged_channels.iter().map(String::as_str).collect(),
        };
        let mut changed = false;
        for channel in channels {
            changed |= match &event.event {
                ChatEvent::MemberTyping(start) => self.apply_start(channel, start),
                ChatEvent::MemberStopTyping(stop) => self.apply_stop(channel, stop),
                _ => false,
            };
        }
        changed
    }

    /// Everyone typing on a channel, in arrival order.
    pub fn typing_users(&self, channel: &str) -> Vec<TypingUser> {
        self.channels.get(channel).cloned().unwrap_or_default()
    }

    /// Everyone typing on a channel except the local user.
    pub fn visible_typing_users(&self, channel: &str, local_user_id: &str) -> Vec<TypingUser> {
        self.channels
            .get(channel)
            .map(|users| {
                users
                    .iter()
                    .filter(|u| u.user_id != local_user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget a channel.
    pub fn clear_channel(&mut self, channel: &str) {
        self.channels.remove(channel);
    }

    /// Forget everything (session teardown).
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

/// Replace `users` with a deduplicated copy of `list`.
fn replace(users: &mut Vec<TypingUser>, list: &[TypingUser]) -> bool {
    let mut next: Vec<TypingUser> = Vec::with_capacity(list.len());
    for user in list {
        if !next.iter().any(|u| u.user_id == user.user_id) {
            next.push(user.clone());
        }
    }
    let changed = *users != next;
    *users = next;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> TypingUser {
        TypingUser {
            user_id: id.to_string(),
            username: format!("name-{}", id),
        }
    }

    fn start(id: &str) -> TypingStart {
        TypingStart {
            user_id: id.to_string(),
            username: format!("name-{}", id),
            typing_users: None,
        }
    }

    fn stop(id: &str) -> TypingStop {
        TypingStop {
            user_id: id.to_string(),
            remaining_typing_users: None,
        }
    }

    #[test]
    fn single_user_start_and_stop_are_idempotent() {
        let mut typing = TypingAggregator::new();
        assert!(typing.apply_start("chat:1", &start("u1")));
        assert!(!typing.apply_start("chat:1", &start("u1")));
        assert_eq!(typing.typing_users("chat:1"), vec![user("u1")]);

        assert!(typing.apply_stop("chat:1", &stop("u1")));
        assert!(!typing.apply_stop("chat:1", &stop("u1")));
        assert!(typing.typing_users("chat:1").is_empty());
    }

    #[test]
    fn authoritative_lists_replace_the_set() {
        let mut typing = TypingAggregator::new();
        typing.apply_start("chat:1", &start("u9"));

        let mut with_list = start("u1");
        with_list.typing_users = Some(vec![user("u1"), user("u2"), user("u1")]);
        assert!(typing.apply_start("chat:1", &with_list));
        assert_eq!(typing.typing_users("chat:1"), vec![user("u1"), user("u2")]);

        let mut remaining = stop("u1");
        remaining.remaining_typing_users = Some(vec![user("u2")]);
        assert!(typing.apply_stop("chat:1", &remaining));
        assert_eq!(typing.typing_users("chat:1"), vec![user("u2")]);

        remaining.remaining_typing_users = Some(Vec::new());
        typing.apply_stop("chat:1", &remaining);
        assert!(typing.typing_users("chat:1").is_empty());
    }

    #[test]
    fn channels_are_independent_and_local_user_is_filtered() {
        let mut typing = TypingAggregator::new();
        typing.apply_start("chat:1", &start("me"));
        typing.apply_start("chat:1", &start("u2"));
        typing.apply_start("chat:2", &start("u3"));

        assert_eq!(typing.visible_typing_users("chat:1", "me"), vec![user("u2")]);
        assert_eq!(typing.typing_users("chat:2"), vec![user("u3")]);

        typing.clear_channel("chat:1");
        assert!(typing.typing_users("chat:1").is_empty());
        assert_eq!(typing.typing_users("chat:2").len(), 1);
    }

    #[test]
    fn untagged_events_apply_to_every_subscribed_channel() {
        let mut typing = TypingAggregator::new();
        let subscribed = vec!["chat:1".to_string(), "chat:2".to_string()];

        let event = InboundEvent {
            channel: None,
            event: ChatEvent::MemberTyping(start("u1")),
        };
        assert!(typing.apply_event(&event, &subscribed));
        assert_eq!(typing.typing_users("chat:2"), vec![user("u1")]);

        let event = InboundEvent::on_channel("chat:1", ChatEvent::MemberStopTyping(stop("u1")));
        assert!(typing.apply_event(&event, &subscribed));
        assert!(typing.typing_users("chat:1").is_empty());
        assert_eq!(typing.typing_users("chat:2").len(), 1);
        assert!(!typing.apply_event(&event, &[]));
    }
}
