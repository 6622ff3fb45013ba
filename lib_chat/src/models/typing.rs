use serde::{Deserialize, Serialize};

/// A user shown in a channel's typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    /// User id; unique within one channel's typing set.
    pub user_id: String,
    /// Display name.
    #[serde(default)]
    pub username: String,
}

/// `member-typing` payload.
///
/// When `typing_users` is present the server is sending the full, authoritative
/// list for the channel; otherwise this is a single-user delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStart {
    /// The user who started typing.
    pub user_id: String,
    /// Their display name.
    #[serde(default)]
    pub username: String,
    /// Authoritative list of everyone typing, if the server sent one.
    #[serde(default)]
    pub typing_users: Option<Vec<TypingUser>>,
}

/// `member-stop-typing` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStop {
    /// The user who stopped typing.
    pub user_id: String,
    /// Authoritative list of who is still typing, if the server sent one.
    #[serde(default)]
    pub remaining_typing_users: Option<Vec<TypingUser>>,
}

/// `member-status-update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    /// The user whose status changed.
    pub user_id: String,
    /// New status (`online`, `idle`, `offline`, ...).
    pub status: String,
}
