use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Chat Message
///
/// One message record as carried by `new-message`, `message-update` and
/// `message-delete` events and by history pages. Deletes are soft: the record
/// comes back with `deleted` set and its content replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique message id. The cache deduplicates on this.
    pub id: String,
    /// Message body.
    #[serde(default)]
    pub content: String,
    /// Attachment URL, if the message carries a file.
    #[serde(default)]
    pub file_url: Option<String>,
    /// Attachment MIME type.
    #[serde(default)]
    pub file_type: Option<String>,
    /// Attachment original file name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Server membership id of the author (channel messages only).
    #[serde(default)]
    pub member_id: Option<String>,
    /// Author user id.
    pub user_id: String,
    /// Author display name.
    #[serde(default)]
    pub username: String,
    /// Author avatar URL.
    #[serde(default)]
    pub user_image: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
    /// Set once the content has been edited.
    #[serde(default)]
    pub edited: bool,
    /// Nested author summary, when the sender includes it.
    #[serde(default)]
    pub member: Option<MemberSummary>,
}

/// Membership summary nested in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    /// Membership id.
    pub id: String,
    /// Role within the server (`ADMIN`, `MODERATOR`, `GUEST`, ...).
    #[serde(default)]
    pub role: Option<String>,
    /// The user behind the membership.
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// User summary nested in a membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// User id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Avatar URL.
    #[serde(default)]
    pub image_url: Option<String>,
}
