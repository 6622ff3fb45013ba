//! # Subscription Registry
//!
//! The set of channels the local client wants to hear about. The registry is the
//! source of truth for "desired" subscriptions: entries survive transport loss
//! and are replayed, not recreated, every time the connection reopens.
//!
//! Nothing here talks to the socket. Each mutating call reports the frame that
//! should go out if the transport is currently open, and the session task sends
//! it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ClientFrame;

/// Presence identity attached to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    /// Local user id announced on the channel.
    pub user_id: String,
    /// Free-form metadata (display name, avatar, ...).
    #[serde(default)]
    pub user_info: Option<Value>,
}

impl Presence {
    /// Presence with no extra metadata.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: None,
        }
    }

    /// Attach metadata.
    pub fn with_info(mut self, info: Value) -> Self {
        self.user_info = Some(info);
        self
    }
}

/// One desired subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Channel name (`chat:<id>`). Unique within the registry.
    pub channel_name: String,
    /// Optional presence identity.
    #[serde(default)]
    pub presence: Option<Presence>,
}

impl Subscription {
    /// Subscribe anonymously.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            presence: None,
        }
    }

    /// Subscribe with a presence identity.
    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = Some(presence);
        self
    }

    /// The subscribe frame for this entry.
    pub fn to_frame(&self) -> ClientFrame {
        let (user_id, user_info) = match &self.presence {
            Some(presence) => (Some(presence.user_id.clone()), presence.user_info.clone()),
            None => (None, None),
        };
        ClientFrame::Subscribe {
            channel_name: self.channel_name.clone(),
            user_id,
            user_info,
        }
    }
}

/// # Subscription Registry
///
/// Desired subscriptions keyed by channel name.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// # Subscribe
    ///
    /// Record the subscription. Subscribing to a channel that is already
    /// present is a no-op on the wire; a changed presence is stored so the
    /// next replay carries it.
    ///
    /// # Returns
    /// The frame to send now, if `transport_open` and the channel is new.
    pub fn subscribe(&mut self, subscription: Subscription, transport_open: bool) -> Option<ClientFrame> {
        if let Some(existing) = self.subscriptions.get_mut(&subscription.channel_name) {
            if existing.presence != subscription.presence {
                log::debug!("Presence updated for {}", subscription.channel_name);
                existing.presence = subscription.presence;
            } else {
                log::trace!("Already subscribed to {}", subscription.channel_name);
            }
            return None;
        }

        let frame = subscription.to_frame();
        log::debug!("Subscription recorded for {}", subscription.channel_name);
        self.subscriptions
            .insert(subscription.channel_name.clone(), subscription);

        transport_open.then_some(frame)
    }

    /// # Unsubscribe
    ///
    /// Forget the channel. Unknown channels are ignored.
    ///
    /// # Returns
    /// The unsubscribe frame to send now, if the channel was known and
    /// `transport_open`.
    pub fn unsubscribe(&mut self, channel_name: &str, transport_open: bool) -> Option<ClientFrame> {
        self.subscriptions.remove(channel_name)?;
        log::debug!("Subscription removed for {}", channel_name);

        transport_open.then(|| ClientFrame::Unsubscribe {
            channel_name: channel_name.to_string(),
        })
    }

    /// Subscribe frames for every desired channel, for replay after the
    /// connection opens.
    pub fn replay(&self) -> Vec<ClientFrame> {
        self.subscriptions.values().map(Subscription::to_frame).collect()
    }

    /// Whether the channel is desired.
    pub fn contains(&self, channel_name: &str) -> bool {
        self.subscriptions.contains_key(channel_name)
    }

    /// The stored entry for a channel.
    pub fn get(&self, channel_name: &str) -> Option<&Subscription> {
        self.subscriptions.get(channel_name)
    }

    /// Number of desired channels.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether nothing is desired.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Desired channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscriptions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop everything (session teardown).
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}
