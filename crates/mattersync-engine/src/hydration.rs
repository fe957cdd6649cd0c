//! Paginated backfill of a freshly connected (or reconnected) server.

use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

use mattersync_types::models::{
    ChannelData, ChannelKind, ChannelMember, PostData, PostList, Preference, TeamData, UserData,
    UserStatus,
};

use crate::endpoints::{CHANNEL_MEMBERSHIPS_PER_PAGE, MEMBERS_PER_PAGE, USERS_PER_PAGE};
use crate::error::{RequestError, SyncError};
use crate::graph::{Applied, Channel, Post, Team, User};
use crate::session::{After, Completion, Ctx};
use crate::transport::HttpResponse;
use crate::actions;

type Response = Result<HttpResponse, RequestError>;

fn decode<T: DeserializeOwned>(ctx: &mut Ctx<'_>, what: &str, result: Response) -> Option<T> {
    match result.and_then(|response| response.json::<T>()) {
        Ok(value) => Some(value),
        Err(e) => {
            ctx.fail(&format!("could not fetch {}: {}", what, e));
            None
        }
    }
}

pub fn on_login(ctx: &mut Ctx<'_>, result: Response) -> After {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            ctx.fail(&SyncError::Authentication(e.to_string()).to_string());
            return After::RemoveServer;
        }
    };
    let Some(token) = response.token.clone().filter(|t| !t.is_empty()) else {
        ctx.fail(&SyncError::Authentication("login response carried no token".into()).to_string());
        return After::RemoveServer;
    };
    let me: UserData = match response.json() {
        Ok(me) => me,
        Err(e) => {
            ctx.fail(&SyncError::Authentication(e.to_string()).to_string());
            return After::RemoveServer;
        }
    };

    info!("Logged in to {} as {}", ctx.server.id, me.username);
    ctx.server.token = Some(token);
    ctx.server.me = Some(me.id.clone());
    ctx.server.users.insert(me.id.clone(), User::from(me));
    ctx.server.resync_pending = false;
    ctx.open_stream();

    let request = ctx.api().users_page(0);
    ctx.enqueue(request, Completion::Users { page: 0 });
    After::Continue
}

pub fn on_users(ctx: &mut Ctx<'_>, page: usize, result: Response) {
    let Some(users) = decode::<Vec<UserData>>(ctx, "users", result) else {
        return;
    };
    let full = users.len() == USERS_PER_PAGE;
    for data in users {
        insert_user(ctx, data);
    }

    if full {
        let request = ctx.api().users_page(page + 1);
        ctx.enqueue(request, Completion::Users { page: page + 1 });
    } else {
        debug!("{} knows {} users", ctx.server.id, ctx.server.users.len());
        let request = ctx.api().preferences();
        ctx.enqueue(request, Completion::Preferences);
    }
}

fn insert_user(ctx: &mut Ctx<'_>, data: UserData) {
    let mut user = User::from(data);
    if let Some(existing) = ctx.server.users.get(&user.id) {
        user.status = existing.status.clone();
    }
    ctx.server.users.insert(user.id.clone(), user);
}

pub fn on_user(ctx: &mut Ctx<'_>, result: Response) {
    if let Some(data) = decode::<UserData>(ctx, "user", result) {
        debug!("{} learned about user {}", ctx.server.id, data.username);
        insert_user(ctx, data);
    }
}

pub fn on_preferences(ctx: &mut Ctx<'_>, result: Response) {
    // Without preferences closed channels simply show up; teams still load.
    match result.and_then(|response| response.json::<Vec<Preference>>()) {
        Ok(preferences) => {
            let closed = preferences.into_iter().filter(Preference::closes_channel);
            ctx.server.closed_channels.extend(closed.map(|p| p.name));
        }
        Err(e) => warn!("{}: could not fetch preferences: {}", ctx.server.id, e),
    }
    let request = ctx.api().my_teams();
    ctx.enqueue(request, Completion::Teams);
}

pub fn on_teams(ctx: &mut Ctx<'_>, result: Response) {
    let Some(teams) = decode::<Vec<TeamData>>(ctx, "teams", result) else {
        return;
    };
    for data in teams {
        add_team(ctx, data);
    }
}

pub fn on_team(ctx: &mut Ctx<'_>, result: Response) {
    if let Some(data) = decode::<TeamData>(ctx, "team", result) {
        add_team(ctx, data);
    }
}

fn add_team(ctx: &mut Ctx<'_>, data: TeamData) {
    if ctx.server.teams.contains_key(&data.id) {
        return;
    }
    let team = Team::from(data);
    let team_id = team.id.clone();
    info!("{} joined team {}", ctx.server.id, team.display_name);
    ctx.server.teams.insert(team_id.clone(), team);

    let request = ctx.api().team_channels(&team_id);
    ctx.enqueue(request, Completion::TeamChannels { team_id });
}

pub fn on_team_channels(ctx: &mut Ctx<'_>, team_id: &str, result: Response) {
    let Some(channels) = decode::<Vec<ChannelData>>(ctx, "team channels", result) else {
        return;
    };
    if !ctx.server.teams.contains_key(team_id) {
        debug!("{} left team {} while it was loading", ctx.server.id, team_id);
        return;
    }
    for data in channels {
        if !ctx.server.has_channel(&data.id) && wanted_in_backfill(ctx, &data) {
            create_channel(ctx, data);
        }
    }

    let partners = ctx.server.direct_partners();
    request_presence(ctx, partners);
    let request = ctx.api().my_channel_members_page(0);
    ctx.enqueue(request, Completion::MyChannelMembers { page: 0 });
}

pub fn on_channel(ctx: &mut Ctx<'_>, result: Response) {
    if let Some(data) = decode::<ChannelData>(ctx, "channel", result) {
        if !ctx.server.has_channel(&data.id) {
            create_channel(ctx, data);
        }
    }
}

/// Direct channels without any post and channels the user closed are left
/// out of the team listing. Channels announced by an event always open.
fn wanted_in_backfill(ctx: &Ctx<'_>, data: &ChannelData) -> bool {
    if data.kind == ChannelKind::Direct && data.last_post_at == 0 {
        trace!("Skipping empty direct channel {}", data.id);
        return false;
    }
    if ctx.server.is_closed(data) {
        trace!("Skipping closed channel {}", data.id);
        return false;
    }
    true
}

/// Registers a discovered channel and starts loading it.
pub fn create_channel(ctx: &mut Ctx<'_>, data: ChannelData) -> bool {
    if data.kind == ChannelKind::Unknown {
        warn!("{}: channel {} has an unknown type", ctx.server.id, data.id);
    }

    let channel = Channel::from_data(data, ctx.server.me());
    let channel_id = channel.id.clone();
    if !ctx.server.insert_channel(channel) {
        warn!("{}: channel {} belongs to an unknown team", ctx.server.id, channel_id);
        return false;
    }
    debug!("{} opened channel {}", ctx.server.id, channel_id);
    announce_channel(ctx, &channel_id);
    load_channel(ctx, &channel_id);
    true
}

/// Pushes name and header of a channel to the view.
pub fn announce_channel(ctx: &mut Ctx<'_>, channel_id: &str) {
    let server = &*ctx.server;
    if let Some(channel) = server.channel(channel_id) {
        let title = channel.title(&server.users);
        ctx.view.set_channel_properties(&server.id, channel, &title);
    }
}

fn load_channel(ctx: &mut Ctx<'_>, channel_id: &str) {
    set_loading(ctx, channel_id, true);
    let request = ctx.api().unread_posts(channel_id);
    ctx.enqueue(
        request,
        Completion::UnreadPosts {
            channel_id: channel_id.to_string(),
            attempt: 0,
        },
    );
    let request = ctx.api().channel_members_page(channel_id, 0);
    ctx.enqueue(
        request,
        Completion::ChannelMembers {
            channel_id: channel_id.to_string(),
            page: 0,
        },
    );
}

fn set_loading(ctx: &mut Ctx<'_>, channel_id: &str, loading: bool) {
    let Some(channel) = ctx.server.channel_mut(channel_id) else {
        return;
    };
    channel.loading = loading;
    if loading {
        channel.dropped_while_loading = false;
    }
    let server = &*ctx.server;
    if let Some(channel) = server.channel(channel_id) {
        ctx.view.set_channel_loading(&server.id, channel, loading);
    }
}

pub fn on_channel_members(ctx: &mut Ctx<'_>, channel_id: &str, page: usize, result: Response) {
    let Some(members) = decode::<Vec<ChannelMember>>(ctx, "channel members", result) else {
        return;
    };
    if !ctx.server.has_channel(channel_id) {
        return;
    }
    if members.len() == MEMBERS_PER_PAGE {
        let request = ctx.api().channel_members_page(channel_id, page + 1);
        ctx.enqueue(
            request,
            Completion::ChannelMembers {
                channel_id: channel_id.to_string(),
                page: page + 1,
            },
        );
    }

    for member in members {
        add_member(ctx, channel_id, &member.user_id);
    }
}

/// Adds a user to a channel roster and the view. Unknown or deleted users are skipped.
pub fn add_member(ctx: &mut Ctx<'_>, channel_id: &str, user_id: &str) {
    if !ctx.server.users.get(user_id).is_some_and(|u| !u.deleted) {
        return;
    }
    let Some(channel) = ctx.server.channel_mut(channel_id) else {
        return;
    };
    if !channel.members.insert(user_id.to_string()) {
        return;
    }
    let server = &*ctx.server;
    if let (Some(channel), Some(user)) = (server.channel(channel_id), server.users.get(user_id)) {
        ctx.view.add_user(&server.id, channel, user);
    }
}

pub fn on_my_channel_members(ctx: &mut Ctx<'_>, page: usize, result: Response) {
    let Some(members) = decode::<Vec<ChannelMember>>(ctx, "channel memberships", result) else {
        return;
    };
    if members.len() == CHANNEL_MEMBERSHIPS_PER_PAGE {
        let request = ctx.api().my_channel_members_page(page + 1);
        ctx.enqueue(request, Completion::MyChannelMembers { page: page + 1 });
    }
    for member in members {
        set_muted(ctx, &member);
    }
}

/// Applies the mute flag of the user's own membership.
pub fn set_muted(ctx: &mut Ctx<'_>, member: &ChannelMember) {
    let Some(channel) = ctx.server.channel_mut(&member.channel_id) else {
        return;
    };
    let muted = member.is_muted();
    if channel.muted != muted {
        channel.muted = muted;
        announce_channel(ctx, &member.channel_id);
    }
}

pub fn request_presence(ctx: &mut Ctx<'_>, mut user_ids: Vec<String>) {
    user_ids.sort();
    user_ids.dedup();
    if user_ids.is_empty() {
        return;
    }
    let request = ctx.api().users_status(&user_ids);
    ctx.enqueue(request, Completion::UsersStatus);
}

pub fn on_users_status(ctx: &mut Ctx<'_>, result: Response) {
    let Some(statuses) = decode::<Vec<UserStatus>>(ctx, "user status", result) else {
        return;
    };
    for status in statuses {
        set_presence(ctx, &status.user_id, status.status);
    }
}

pub fn set_presence(ctx: &mut Ctx<'_>, user_id: &str, status: String) {
    let Some(user) = ctx.server.users.get_mut(user_id) else {
        return;
    };
    if user.status.as_deref() == Some(status.as_str()) {
        return;
    }
    user.status = Some(status);
    let server = &*ctx.server;
    if let Some(user) = server.users.get(user_id) {
        ctx.view.presence_changed(&server.id, user);
    }
}

/// Applies one page of posts.
///
/// `after` is `None` for the unread window (posts count as read) and the
/// cursor the page was requested from otherwise.
pub fn on_posts(ctx: &mut Ctx<'_>, channel_id: &str, after: Option<String>, attempt: u8, result: Response) {
    if !ctx.server.has_channel(channel_id) {
        debug!("Posts for closed channel {} discarded", channel_id);
        return;
    }
    let list = match result.and_then(|response| response.json::<PostList>()) {
        Ok(list) => list,
        Err(e) if attempt < ctx.settings.page_retries => {
            debug!("Retrying posts of {} after: {}", channel_id, e);
            request_posts(ctx, channel_id, after, attempt + 1);
            return;
        }
        Err(e) => {
            set_loading(ctx, channel_id, false);
            ctx.fail(&format!("could not load posts of channel {}: {}", channel_id, e));
            return;
        }
    };

    let terminal = list.is_terminal();
    let read = after.is_none();
    let last = write_posts(ctx, channel_id, list.oldest_first(), read);

    if let Some(last) = &last {
        let focused = ctx.is_focused(channel_id);
        if let Some(channel) = ctx.server.channel_mut(channel_id) {
            if read {
                channel.last_read_cursor = channel.posts.get(last).map(Post::cursor);
                channel.unread = false;
            } else if !focused {
                channel.unread = channel.has_unread();
            }
        }
        if read {
            let server = &*ctx.server;
            if let Some(channel) = server.channel(channel_id) {
                ctx.view.channel_read(&server.id, channel);
            }
        }
    }

    if !terminal {
        let next = last.or_else(|| {
            ctx.server
                .channel(channel_id)
                .and_then(|c| c.last_post_cursor.as_ref())
                .map(|c| c.post_id.clone())
        });
        if let Some(next) = next {
            request_posts(ctx, channel_id, Some(next), 0);
            return;
        }
    }
    finish_loading(ctx, channel_id);
}

fn request_posts(ctx: &mut Ctx<'_>, channel_id: &str, after: Option<String>, attempt: u8) {
    let channel_id = channel_id.to_string();
    match after {
        Some(after) => {
            let request = ctx.api().posts_after(&channel_id, &after);
            ctx.enqueue(
                request,
                Completion::PostsAfter {
                    channel_id,
                    after,
                    attempt,
                },
            );
        }
        None => {
            let request = ctx.api().unread_posts(&channel_id);
            ctx.enqueue(request, Completion::UnreadPosts { channel_id, attempt });
        }
    }
}

/// Terminal page reached. A post dropped while loading costs one more catch-up.
fn finish_loading(ctx: &mut Ctx<'_>, channel_id: &str) {
    let Some(channel) = ctx.server.channel_mut(channel_id) else {
        return;
    };
    if std::mem::take(&mut channel.dropped_while_loading) {
        let cursor = channel.last_post_cursor.as_ref().map(|c| c.post_id.clone());
        debug!("Catching up on {} after dropped events", channel_id);
        request_posts(ctx, channel_id, cursor, 0);
        return;
    }
    set_loading(ctx, channel_id, false);
    if ctx.is_focused(channel_id) {
        actions::mark_read(ctx, channel_id);
    }
}

/// Applies posts oldest-first and renders them. Returns the id of the last one.
fn write_posts(ctx: &mut Ctx<'_>, channel_id: &str, posts: Vec<PostData>, read: bool) -> Option<String> {
    let mut last = None;
    for data in posts {
        let mut post = Post::from(data);
        post.read = read;
        let post_id = post.id.clone();
        let Some(channel) = ctx.server.channel_mut(channel_id) else {
            break;
        };
        let applied = channel.apply_post(post);
        render_post(ctx, channel_id, &post_id, applied);
        last = Some(post_id);
    }
    last
}

/// Reports an applied post to the view, threaded under its root when known.
pub fn render_post(ctx: &mut Ctx<'_>, channel_id: &str, post_id: &str, applied: Applied) {
    let server = &*ctx.server;
    let Some(channel) = server.channel(channel_id) else {
        return;
    };
    let Some(post) = channel.posts.get(post_id) else {
        return;
    };
    match applied {
        Applied::Inserted => {
            let parent = post.root_id.as_ref().and_then(|root| channel.posts.get(root));
            ctx.view.write_post(&server.id, channel, post, parent);
        }
        Applied::Replaced => ctx.view.edit_post(&server.id, channel, post),
        Applied::Ignored => trace!("Post {} stays deleted", post_id),
    }
}

/// Refetches what every loaded channel missed while the stream was down.
pub fn resync(ctx: &mut Ctx<'_>) {
    let mut count = 0;
    for channel_id in ctx.server.channel_ids() {
        let Some(channel) = ctx.server.channel_mut(&channel_id) else {
            continue;
        };
        if channel.loading {
            continue;
        }
        let cursor = channel.last_post_cursor.as_ref().map(|c| c.post_id.clone());
        set_loading(ctx, &channel_id, true);
        request_posts(ctx, &channel_id, cursor, 0);
        count += 1;
    }
    info!("Resyncing {} channels of {}", count, ctx.server.id);
}
