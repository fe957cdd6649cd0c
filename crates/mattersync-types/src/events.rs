use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{ChannelData, ChannelMember, PostData, ReactionData};

/// Routing metadata attached to every stream envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// Raw frame received over the WebSocket: `{event, data, broadcast}`.
///
/// Replies to our own actions (`{status, seq_reply}`) carry no `event` and
/// decode to `None` in [`Envelope::into_event`].
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub broadcast: Broadcast,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// Events received over the stream that the client knows how to apply.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Hello,
    Posted {
        channel_id: String,
        team_id: String,
        post: PostData,
    },
    PostEdited {
        post: PostData,
    },
    PostDeleted {
        post: PostData,
    },
    ReactionAdded {
        channel_id: String,
        reaction: ReactionData,
    },
    ReactionRemoved {
        channel_id: String,
        reaction: ReactionData,
    },
    ChannelCreated {
        channel_id: String,
    },
    ChannelUpdated {
        channel: ChannelData,
    },
    ChannelMemberUpdated {
        member: ChannelMember,
    },
    ChannelViewed {
        channel_id: String,
    },
    DirectAdded {
        channel_id: String,
    },
    GroupAdded {
        channel_id: String,
    },
    UserAdded {
        channel_id: String,
        user_id: String,
    },
    UserRemoved {
        channel_id: String,
        user_id: String,
    },
    NewUser {
        user_id: String,
    },
    AddedToTeam {
        team_id: String,
        user_id: String,
    },
    LeaveTeam {
        team_id: String,
        user_id: String,
    },
    StatusChange {
        user_id: String,
        status: String,
    },
    /// Event names this client does not handle.
    Unknown(String),
}

impl StreamEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Posted { .. } => "posted",
            Self::PostEdited { .. } => "post_edited",
            Self::PostDeleted { .. } => "post_deleted",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::ChannelCreated { .. } => "channel_created",
            Self::ChannelUpdated { .. } => "channel_updated",
            Self::ChannelMemberUpdated { .. } => "channel_member_updated",
            Self::ChannelViewed { .. } => "channel_viewed",
            Self::DirectAdded { .. } => "direct_added",
            Self::GroupAdded { .. } => "group_added",
            Self::UserAdded { .. } => "user_added",
            Self::UserRemoved { .. } => "user_removed",
            Self::NewUser { .. } => "new_user",
            Self::AddedToTeam { .. } => "added_to_team",
            Self::LeaveTeam { .. } => "leave_team",
            Self::StatusChange { .. } => "status_change",
            Self::Unknown(name) => name,
        }
    }
}

/// Several payload fields are JSON documents serialized into a string.
fn embedded<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(raw) => serde_json::from_str(&raw).map_err(D::Error::custom),
        other => serde_json::from_value(other).map_err(D::Error::custom),
    }
}

#[derive(Deserialize)]
struct PostPayload {
    #[serde(deserialize_with = "embedded")]
    post: PostData,
    #[serde(default)]
    team_id: String,
}

#[derive(Deserialize)]
struct ReactionPayload {
    #[serde(deserialize_with = "embedded")]
    reaction: ReactionData,
}

#[derive(Deserialize)]
struct ChannelPayload {
    #[serde(deserialize_with = "embedded")]
    channel: ChannelData,
}

#[derive(Deserialize)]
struct ChannelMemberPayload {
    #[serde(rename = "channelMember", deserialize_with = "embedded")]
    member: ChannelMember,
}

#[derive(Default, Deserialize)]
struct RefPayload {
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    team_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    status: String,
}

impl Envelope {
    /// Decodes the payload into a typed event.
    ///
    /// Channel ids come from the broadcast when present, falling back to the
    /// payload for events addressed to a single user.
    pub fn into_event(self) -> Result<Option<StreamEvent>, serde_json::Error> {
        let Some(name) = self.event else {
            return Ok(None);
        };
        let broadcast = self.broadcast;
        let data = self.data;

        let refs = |data: serde_json::Value| -> Result<RefPayload, serde_json::Error> {
            if data.is_null() {
                Ok(RefPayload::default())
            } else {
                serde_json::from_value(data)
            }
        };
        let channel_of = |payload: &RefPayload| {
            if broadcast.channel_id.is_empty() {
                payload.channel_id.clone()
            } else {
                broadcast.channel_id.clone()
            }
        };

        let event = match name.as_str() {
            "hello" => StreamEvent::Hello,
            "posted" => {
                let payload: PostPayload = serde_json::from_value(data)?;
                let channel_id = if broadcast.channel_id.is_empty() {
                    payload.post.channel_id.clone()
                } else {
                    broadcast.channel_id.clone()
                };
                StreamEvent::Posted {
                    channel_id,
                    team_id: payload.team_id,
                    post: payload.post,
                }
            }
            "post_edited" => StreamEvent::PostEdited {
                post: serde_json::from_value::<PostPayload>(data)?.post,
            },
            "post_deleted" => StreamEvent::PostDeleted {
                post: serde_json::from_value::<PostPayload>(data)?.post,
            },
            "reaction_added" | "reaction_removed" => {
                let reaction = serde_json::from_value::<ReactionPayload>(data)?.reaction;
                let channel_id = broadcast.channel_id.clone();
                if name == "reaction_added" {
                    StreamEvent::ReactionAdded { channel_id, reaction }
                } else {
                    StreamEvent::ReactionRemoved { channel_id, reaction }
                }
            }
            "channel_updated" => StreamEvent::ChannelUpdated {
                channel: serde_json::from_value::<ChannelPayload>(data)?.channel,
            },
            "channel_member_updated" => StreamEvent::ChannelMemberUpdated {
                member: serde_json::from_value::<ChannelMemberPayload>(data)?.member,
            },
            "channel_created" => StreamEvent::ChannelCreated {
                channel_id: channel_of(&refs(data)?),
            },
            "channel_viewed" => StreamEvent::ChannelViewed {
                channel_id: channel_of(&refs(data)?),
            },
            "direct_added" => StreamEvent::DirectAdded {
                channel_id: channel_of(&refs(data)?),
            },
            "group_added" => StreamEvent::GroupAdded {
                channel_id: channel_of(&refs(data)?),
            },
            "user_added" => {
                let payload = refs(data)?;
                StreamEvent::UserAdded {
                    channel_id: channel_of(&payload),
                    user_id: payload.user_id,
                }
            }
            "user_removed" => {
                let payload = refs(data)?;
                StreamEvent::UserRemoved {
                    channel_id: channel_of(&payload),
                    user_id: payload.user_id,
                }
            }
            "new_user" => StreamEvent::NewUser {
                user_id: refs(data)?.user_id,
            },
            "added_to_team" | "leave_team" => {
                let payload = refs(data)?;
                if name == "added_to_team" {
                    StreamEvent::AddedToTeam {
                        team_id: payload.team_id,
                        user_id: payload.user_id,
                    }
                } else {
                    StreamEvent::LeaveTeam {
                        team_id: payload.team_id,
                        user_id: payload.user_id,
                    }
                }
            }
            "status_change" => {
                let payload = refs(data)?;
                StreamEvent::StatusChange {
                    user_id: payload.user_id,
                    status: payload.status,
                }
            }
            _ => StreamEvent::Unknown(name),
        };

        Ok(Some(event))
    }
}

/// First frame sent on a fresh stream.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationChallenge {
    pub seq: u64,
    pub action: &'static str,
    pub data: AuthenticationData,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationData {
    pub token: String,
}

impl AuthenticationChallenge {
    pub fn new(seq: u64, token: impl Into<String>) -> Self {
        Self {
            seq,
            action: "authentication_challenge",
            data: AuthenticationData {
                token: token.into(),
            },
        }
    }
}
