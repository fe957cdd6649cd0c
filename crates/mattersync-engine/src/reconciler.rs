//! Applies live stream events onto the entity graph.

use tracing::{debug, info, trace};

use mattersync_types::events::StreamEvent;
use mattersync_types::models::{PostData, ReactionData};

use crate::actions;
use crate::graph::{Applied, Post};
use crate::hydration;
use crate::session::{Completion, Ctx};

pub fn apply(ctx: &mut Ctx<'_>, event: StreamEvent) {
    trace!("{} event {}", ctx.server.id, event.name());
    match event {
        StreamEvent::Posted {
            channel_id,
            team_id,
            post,
        } => posted(ctx, &channel_id, &team_id, post),
        StreamEvent::PostEdited { post } => post_edited(ctx, &post),
        StreamEvent::PostDeleted { post } => post_deleted(ctx, &post),
        StreamEvent::ReactionAdded {
            channel_id,
            reaction,
        } => reaction_changed(ctx, &channel_id, &reaction, true),
        StreamEvent::ReactionRemoved {
            channel_id,
            reaction,
        } => reaction_changed(ctx, &channel_id, &reaction, false),
        StreamEvent::ChannelCreated { channel_id }
        | StreamEvent::DirectAdded { channel_id }
        | StreamEvent::GroupAdded { channel_id } => fetch_channel(ctx, &channel_id),
        StreamEvent::UserAdded {
            channel_id,
            user_id,
        } => {
            if ctx.server.is_me(&user_id) {
                fetch_channel(ctx, &channel_id);
            } else {
                hydration::add_member(ctx, &channel_id, &user_id);
            }
        }
        StreamEvent::UserRemoved {
            channel_id,
            user_id,
        } => user_removed(ctx, &channel_id, &user_id),
        StreamEvent::AddedToTeam { team_id, user_id } => {
            if (user_id.is_empty() || ctx.server.is_me(&user_id))
                && !ctx.server.teams.contains_key(&team_id)
            {
                let request = ctx.api().team(&team_id);
                ctx.enqueue(request, Completion::Team);
            }
        }
        StreamEvent::LeaveTeam { team_id, user_id } => {
            if user_id.is_empty() || ctx.server.is_me(&user_id) {
                leave_team(ctx, &team_id);
            }
        }
        StreamEvent::ChannelViewed { channel_id } => {
            let Some(channel) = ctx.server.channel_mut(&channel_id) else {
                return;
            };
            channel.catch_up_read();
            let server = &*ctx.server;
            if let Some(channel) = server.channel(&channel_id) {
                ctx.view.channel_read(&server.id, channel);
            }
        }
        StreamEvent::StatusChange { user_id, status } => {
            hydration::set_presence(ctx, &user_id, status);
        }
        StreamEvent::ChannelUpdated { channel } => {
            let Some(local) = ctx.server.channel_mut(&channel.id) else {
                return;
            };
            local.refresh(&channel);
            hydration::announce_channel(ctx, &channel.id);
        }
        StreamEvent::ChannelMemberUpdated { member } => {
            if ctx.server.is_me(&member.user_id) {
                hydration::set_muted(ctx, &member);
            }
        }
        StreamEvent::NewUser { user_id } => {
            let request = ctx.api().user(&user_id);
            ctx.enqueue(request, Completion::User);
        }
        StreamEvent::Hello => debug!("{} stream says hello", ctx.server.id),
        StreamEvent::Unknown(name) => trace!("Ignoring {} event", name),
    }
}

fn posted(ctx: &mut Ctx<'_>, channel_id: &str, team_id: &str, data: PostData) {
    if !team_id.is_empty() && !ctx.server.teams.contains_key(team_id) {
        trace!("Post for unknown team {} ignored", team_id);
        return;
    }
    let from_me = ctx.server.is_me(&data.user_id);
    let focused = ctx.is_focused(channel_id);
    let Some(channel) = ctx.server.channel_mut(channel_id) else {
        trace!("Post for unknown channel {} ignored", channel_id);
        return;
    };
    if channel.loading {
        debug!("Dropping post {} while {} loads", data.id, channel_id);
        channel.dropped_while_loading = true;
        return;
    }

    let post = Post::from(data);
    let post_id = post.id.clone();
    let applied = channel.apply_post(post);
    if applied == Applied::Inserted && !focused && !from_me {
        channel.unread = true;
    }
    hydration::render_post(ctx, channel_id, &post_id, applied);

    if focused {
        actions::mark_read(ctx, channel_id);
    }
}

fn post_edited(ctx: &mut Ctx<'_>, data: &PostData) {
    let Some(channel) = ctx.server.channel_mut(&data.channel_id) else {
        return;
    };
    if channel.edit_post(data).is_none() {
        return;
    }
    let server = &*ctx.server;
    if let Some(channel) = server.channel(&data.channel_id) {
        if let Some(post) = channel.posts.get(&data.id) {
            ctx.view.edit_post(&server.id, channel, post);
        }
    }
}

fn post_deleted(ctx: &mut Ctx<'_>, data: &PostData) {
    let Some(channel) = ctx.server.channel_mut(&data.channel_id) else {
        return;
    };
    if !channel.delete_post(&data.id) {
        return;
    }
    let server = &*ctx.server;
    if let Some(channel) = server.channel(&data.channel_id) {
        ctx.view.delete_post(&server.id, channel, &data.id);
    }
}

fn reaction_changed(ctx: &mut Ctx<'_>, channel_id: &str, reaction: &ReactionData, added: bool) {
    let channel_id = if ctx.server.has_channel(channel_id) {
        channel_id.to_string()
    } else {
        match ctx.server.channel_of_post(&reaction.post_id) {
            Some(channel) => channel.id.clone(),
            None => return,
        }
    };
    let Some(channel) = ctx.server.channel_mut(&channel_id) else {
        return;
    };
    let changed = if added {
        channel.add_reaction(reaction)
    } else {
        channel.remove_reaction(reaction)
    };
    if !changed {
        return;
    }

    let server = &*ctx.server;
    let Some(channel) = server.channel(&channel_id) else {
        return;
    };
    let Some(post) = channel.posts.get(&reaction.post_id) else {
        return;
    };
    if added {
        ctx.view
            .add_reaction(&server.id, channel, post, &reaction.user_id, &reaction.emoji_name);
    } else {
        ctx.view
            .remove_reaction(&server.id, channel, post, &reaction.user_id, &reaction.emoji_name);
    }
}

fn fetch_channel(ctx: &mut Ctx<'_>, channel_id: &str) {
    if channel_id.is_empty() || ctx.server.has_channel(channel_id) {
        return;
    }
    let request = ctx.api().channel(channel_id);
    ctx.enqueue(request, Completion::Channel);
}

fn user_removed(ctx: &mut Ctx<'_>, channel_id: &str, user_id: &str) {
    if ctx.server.is_me(user_id) {
        if ctx.server.remove_channel(channel_id).is_some() {
            info!("{} left channel {}", ctx.server.id, channel_id);
            ctx.view.close_channel(&ctx.server.id, channel_id);
        }
        return;
    }
    let Some(channel) = ctx.server.channel_mut(channel_id) else {
        return;
    };
    if !channel.members.remove(user_id) {
        return;
    }
    let server = &*ctx.server;
    if let Some(channel) = server.channel(channel_id) {
        ctx.view.remove_user(&server.id, channel, user_id);
    }
}

fn leave_team(ctx: &mut Ctx<'_>, team_id: &str) {
    let Some(team) = ctx.server.teams.remove(team_id) else {
        return;
    };
    info!("{} left team {}", ctx.server.id, team.display_name);
    for channel_id in team.channels.keys() {
        ctx.view.close_channel(&ctx.server.id, channel_id);
    }
}
