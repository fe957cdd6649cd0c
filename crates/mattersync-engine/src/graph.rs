//! In-memory entity graph: Server → Team → Channel → Post.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mattersync_types::models::{
    ChannelData, ChannelKind, FileInfo, PostData, ReactionData, TeamData, UserData,
    millis_to_datetime,
};

use crate::config::ServerConfig;
use crate::worker::{ConnectionState, Worker};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub status: Option<String>,
    pub deleted: bool,
}

impl From<UserData> for User {
    fn from(data: UserData) -> Self {
        Self {
            id: data.id,
            username: data.username,
            first_name: data.first_name,
            last_name: data.last_name,
            status: None,
            deleted: data.delete_at != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub root_id: Option<String>,
    pub channel_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub kind: String,
    pub reactions: Vec<Reaction>,
    pub files: Vec<FileInfo>,
    pub edited: bool,
    pub deleted: bool,
    pub read: bool,
    pub from_bot: bool,
    pub username_override: Option<String>,
}

impl From<PostData> for Post {
    fn from(data: PostData) -> Self {
        let from_bot = data.props.is_from_bot();
        Self {
            id: data.id,
            root_id: Some(data.root_id).filter(|r| !r.is_empty()),
            channel_id: data.channel_id,
            message: data.message,
            created_at: millis_to_datetime(data.create_at),
            user_id: data.user_id,
            kind: data.kind,
            reactions: data
                .metadata
                .reactions
                .into_iter()
                .map(|r| Reaction {
                    user_id: r.user_id,
                    emoji: r.emoji_name,
                })
                .collect(),
            files: data.metadata.files,
            edited: data.edit_at != 0,
            deleted: data.delete_at != 0,
            read: false,
            from_bot,
            username_override: data.props.override_username,
        }
    }
}

impl Post {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            post_id: self.id.clone(),
            created_at: self.created_at,
        }
    }
}

/// Position of a post in a channel's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub post_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of applying a post to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    /// The post id was tombstoned earlier.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub kind: ChannelKind,
    pub name: String,
    pub display_name: String,
    pub header: String,
    pub team_id: Option<String>,
    pub posts: HashMap<String, Post>,
    /// Post ids sorted by creation time.
    pub order: Vec<String>,
    pub members: BTreeSet<String>,
    pub last_post_cursor: Option<Cursor>,
    pub last_read_cursor: Option<Cursor>,
    pub loading: bool,
    pub muted: bool,
    pub unread: bool,
    /// A `posted` event arrived while loading and was dropped.
    pub dropped_while_loading: bool,
    pub dm_partner: Option<String>,
}

impl Channel {
    pub fn from_data(data: ChannelData, me: &str) -> Self {
        let dm_partner = match data.kind {
            ChannelKind::Direct => data
                .direct_participants()
                .map(|(a, b)| if a == me { b } else { a }.to_string()),
            _ => None,
        };
        Self {
            id: data.id,
            kind: data.kind,
            name: data.name,
            display_name: data.display_name,
            header: data.header,
            team_id: Some(data.team_id).filter(|t| !t.is_empty()),
            posts: HashMap::new(),
            order: Vec::new(),
            members: BTreeSet::new(),
            last_post_cursor: None,
            last_read_cursor: None,
            loading: false,
            muted: false,
            unread: false,
            dropped_while_loading: false,
            dm_partner,
        }
    }

    /// Updates name, display name and header from fresh channel data.
    pub fn refresh(&mut self, data: &ChannelData) {
        self.name = data.name.clone();
        self.display_name = data.display_name.clone();
        self.header = data.header.clone();
    }

    /// Name to show: the display name, or the partner's username for direct channels.
    pub fn title(&self, users: &HashMap<String, User>) -> String {
        if !self.display_name.is_empty() {
            return self.display_name.clone();
        }
        self.dm_partner
            .as_ref()
            .and_then(|id| users.get(id))
            .map(|u| u.username.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Inserts or replaces a post, keeping `order` sorted and the cursor monotonic.
    pub fn apply_post(&mut self, post: Post) -> Applied {
        if let Some(existing) = self.posts.get_mut(&post.id) {
            if existing.deleted {
                return Applied::Ignored;
            }
            let read = existing.read || post.read;
            *existing = post;
            existing.read = read;
            return Applied::Replaced;
        }

        let key = (post.created_at, post.id.as_str());
        let at = self.order.partition_point(|id| {
            self.posts
                .get(id)
                .is_some_and(|p| (p.created_at, p.id.as_str()) <= key)
        });
        self.order.insert(at, post.id.clone());
        self.advance_cursor(post.cursor());
        self.posts.insert(post.id.clone(), post);
        Applied::Inserted
    }

    /// Moves `last_post_cursor` forward, never back.
    pub fn advance_cursor(&mut self, cursor: Cursor) {
        let newer = self
            .last_post_cursor
            .as_ref()
            .is_none_or(|current| cursor.created_at >= current.created_at);
        if newer {
            self.last_post_cursor = Some(cursor);
        }
    }

    /// Replaces message and attachments of a known, live post.
    pub fn edit_post(&mut self, data: &PostData) -> Option<&Post> {
        let post = self.posts.get_mut(&data.id).filter(|p| !p.deleted)?;
        post.message = data.message.clone();
        post.files = data.metadata.files.clone();
        post.edited = true;
        Some(post)
    }

    /// Tombstones a post. Returns false for unknown or already deleted posts.
    pub fn delete_post(&mut self, post_id: &str) -> bool {
        match self.posts.get_mut(post_id) {
            Some(post) if !post.deleted => {
                post.deleted = true;
                post.message.clear();
                post.files.clear();
                post.reactions.clear();
                true
            }
            _ => false,
        }
    }

    /// Adds a reaction once per (user, emoji).
    pub fn add_reaction(&mut self, reaction: &ReactionData) -> bool {
        let Some(post) = self.posts.get_mut(&reaction.post_id).filter(|p| !p.deleted) else {
            return false;
        };
        let duplicate = post
            .reactions
            .iter()
            .any(|r| r.user_id == reaction.user_id && r.emoji == reaction.emoji_name);
        if duplicate {
            return false;
        }
        post.reactions.push(Reaction {
            user_id: reaction.user_id.clone(),
            emoji: reaction.emoji_name.clone(),
        });
        true
    }

    pub fn remove_reaction(&mut self, reaction: &ReactionData) -> bool {
        let Some(post) = self.posts.get_mut(&reaction.post_id) else {
            return false;
        };
        let before = post.reactions.len();
        post.reactions
            .retain(|r| !(r.user_id == reaction.user_id && r.emoji == reaction.emoji_name));
        post.reactions.len() != before
    }

    pub fn posts_in_order(&self) -> impl Iterator<Item = &Post> {
        self.order.iter().filter_map(|id| self.posts.get(id))
    }

    /// True when posts arrived since the read cursor last moved.
    pub fn has_unread(&self) -> bool {
        match (&self.last_post_cursor, &self.last_read_cursor) {
            (None, _) => false,
            (Some(last), Some(read)) => last.post_id != read.post_id,
            (Some(_), None) => true,
        }
    }

    /// Moves the read cursor up to the last post.
    pub fn catch_up_read(&mut self) {
        self.last_read_cursor = self.last_post_cursor.clone();
        self.unread = false;
        for post in self.posts.values_mut() {
            post.read = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub channels: BTreeMap<String, Channel>,
}

impl From<TeamData> for Team {
    fn from(data: TeamData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            display_name: data.display_name,
            channels: BTreeMap::new(),
        }
    }
}

/// Everything known about one connected server.
pub struct Server {
    pub id: String,
    pub config: ServerConfig,
    /// Changes on every connect; completions of an older session are ignored.
    pub session: Uuid,
    pub token: Option<String>,
    pub me: Option<String>,
    pub state: ConnectionState,
    pub users: HashMap<String, User>,
    pub teams: BTreeMap<String, Team>,
    /// Direct and group channels.
    pub channels: BTreeMap<String, Channel>,
    /// User ids and channel ids hidden by the user's sidebar preferences.
    pub closed_channels: HashSet<String>,
    pub worker: Option<Worker>,
    pub reconnect_attempts: u32,
    pub next_reconnect: Option<Instant>,
    /// Set by a reconnect; loaded channels resync once the new stream opens.
    pub resync_pending: bool,
    pub next_status_poll: Option<Instant>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            config,
            session: Uuid::new_v4(),
            token: None,
            me: None,
            state: ConnectionState::Disconnected,
            users: HashMap::new(),
            teams: BTreeMap::new(),
            channels: BTreeMap::new(),
            closed_channels: HashSet::new(),
            worker: None,
            reconnect_attempts: 0,
            next_reconnect: None,
            resync_pending: false,
            next_status_poll: None,
        }
    }

    pub fn me(&self) -> &str {
        self.me.as_deref().unwrap_or_default()
    }

    pub fn is_me(&self, user_id: &str) -> bool {
        self.me.as_deref() == Some(user_id)
    }

    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.get(channel_id).or_else(|| {
            self.teams
                .values()
                .find_map(|team| team.channels.get(channel_id))
        })
    }

    pub fn channel_mut(&mut self, channel_id: &str) -> Option<&mut Channel> {
        if self.channels.contains_key(channel_id) {
            return self.channels.get_mut(channel_id);
        }
        self.teams
            .values_mut()
            .find_map(|team| team.channels.get_mut(channel_id))
    }

    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channel(channel_id).is_some()
    }

    /// Stores a channel under its team, or at server level for direct/group.
    /// Returns false when its team is unknown.
    pub fn insert_channel(&mut self, channel: Channel) -> bool {
        if channel.kind.is_team_scoped() {
            let Some(team) = channel
                .team_id
                .as_ref()
                .and_then(|id| self.teams.get_mut(id))
            else {
                return false;
            };
            team.channels.insert(channel.id.clone(), channel);
        } else {
            self.channels.insert(channel.id.clone(), channel);
        }
        true
    }

    pub fn remove_channel(&mut self, channel_id: &str) -> Option<Channel> {
        if let Some(channel) = self.channels.remove(channel_id) {
            return Some(channel);
        }
        self.teams
            .values_mut()
            .find_map(|team| team.channels.remove(channel_id))
    }

    pub fn all_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels
            .values()
            .chain(self.teams.values().flat_map(|t| t.channels.values()))
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.all_channels().map(|c| c.id.clone()).collect()
    }

    /// Finds the channel holding `post_id`.
    pub fn channel_of_post(&self, post_id: &str) -> Option<&Channel> {
        self.all_channels().find(|c| c.posts.contains_key(post_id))
    }

    pub fn direct_channel_with(&self, user_id: &str) -> Option<&Channel> {
        self.channels
            .values()
            .find(|c| c.dm_partner.as_deref() == Some(user_id))
    }

    pub fn direct_partners(&self) -> Vec<String> {
        self.channels
            .values()
            .filter_map(|c| c.dm_partner.clone())
            .collect()
    }

    /// Whether the channel is hidden by a closed direct/group preference.
    pub fn is_closed(&self, data: &ChannelData) -> bool {
        match data.kind {
            ChannelKind::Direct => data.direct_participants().is_some_and(|(a, b)| {
                self.closed_channels.contains(a) || self.closed_channels.contains(b)
            }),
            ChannelKind::Group => self.closed_channels.contains(&data.id),
            _ => false,
        }
    }

    /// Drops every entity below the server, returning the removed channel ids.
    pub fn clear_graph(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        for team in std::mem::take(&mut self.teams).into_values() {
            ids.extend(team.channels.into_keys());
        }
        ids.extend(std::mem::take(&mut self.channels).into_keys());
        self.users.clear();
        self.closed_channels.clear();
        self.me = None;
        ids
    }
}
