use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Converts a Mattermost millisecond timestamp into a UTC date.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Non-zero once the account has been deactivated.
    #[serde(default)]
    pub delete_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
}

/// Wire representation of a channel type (`"D"`, `"G"`, `"O"`, `"P"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    #[serde(rename = "D")]
    Direct,
    #[serde(rename = "G")]
    Group,
    #[serde(rename = "O")]
    Public,
    #[serde(rename = "P")]
    Private,
    #[serde(other)]
    Unknown,
}

impl ChannelKind {
    /// Direct and group channels live at server level, the others under a team.
    pub fn is_team_scoped(self) -> bool {
        !matches!(self, Self::Direct | Self::Group)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub last_post_at: i64,
}

impl ChannelData {
    /// For direct channels the name is `<user_id>__<user_id>`.
    pub fn direct_participants(&self) -> Option<(&str, &str)> {
        self.name.split_once("__")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelNotifyProps {
    #[serde(default)]
    pub mark_unread: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub notify_props: ChannelNotifyProps,
}

impl ChannelMember {
    /// A channel is muted unless it notifies on every unread message.
    pub fn is_muted(&self) -> bool {
        self.notify_props.mark_unread != "all"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionData {
    pub user_id: String,
    pub post_id: String,
    pub emoji_name: String,
    #[serde(default)]
    pub create_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMetadata {
    #[serde(default)]
    pub files: Vec<FileInfo>,
    #[serde(default)]
    pub reactions: Vec<ReactionData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostProps {
    #[serde(default)]
    pub from_bot: Option<serde_json::Value>,
    #[serde(default)]
    pub from_webhook: Option<serde_json::Value>,
    #[serde(default)]
    pub override_username: Option<String>,
}

impl PostProps {
    /// Bot and webhook flags arrive either as booleans or as `"true"` strings.
    pub fn is_from_bot(&self) -> bool {
        fn truthy(value: &Option<serde_json::Value>) -> bool {
            match value {
                Some(serde_json::Value::Bool(b)) => *b,
                Some(serde_json::Value::String(s)) => s == "true",
                _ => false,
            }
        }
        truthy(&self.from_bot) || truthy(&self.from_webhook)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostData {
    pub id: String,
    #[serde(default)]
    pub root_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub message: String,
    pub create_at: i64,
    #[serde(default)]
    pub edit_at: i64,
    #[serde(default)]
    pub delete_at: i64,
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub props: PostProps,
    #[serde(default)]
    pub metadata: PostMetadata,
}

/// A page of posts as returned by the post listing endpoints.
///
/// `order` is newest-first; `next_post_id` is empty on the terminal page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostList {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub posts: HashMap<String, PostData>,
    #[serde(default)]
    pub next_post_id: String,
    #[serde(default)]
    pub prev_post_id: String,
}

impl PostList {
    /// Posts of the page oldest-first, skipping ids missing from `posts`.
    pub fn oldest_first(mut self) -> Vec<PostData> {
        self.order.reverse();
        self.order
            .iter()
            .filter_map(|id| self.posts.remove(id))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.next_post_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: String,
    pub category: String,
    pub name: String,
    pub value: String,
}

impl Preference {
    /// Direct and group channels the user closed in the sidebar.
    pub fn closes_channel(&self) -> bool {
        matches!(
            self.category.as_str(),
            "direct_channel_show" | "group_channel_show"
        ) && self.value == "false"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatus {
    pub user_id: String,
    pub status: String,
}
