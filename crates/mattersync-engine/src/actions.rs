//! User initiated calls. Failures come back through `ViewSink::action_failed`.

use tracing::{debug, trace};

use crate::error::{RequestError, Result, SyncError};
use crate::hydration;
use crate::session::{Completion, Ctx};
use crate::transport::HttpResponse;

pub fn send_post(ctx: &mut Ctx<'_>, channel_id: &str, message: &str, root_id: Option<&str>) -> Result<()> {
    require_channel(ctx, channel_id)?;
    if let Some(root_id) = root_id {
        require_post(ctx, root_id)?;
    }
    let request = ctx.api().create_post(channel_id, message, root_id);
    ctx.enqueue(
        request,
        Completion::CreatePost {
            channel_id: channel_id.to_string(),
        },
    );
    Ok(())
}

pub fn execute_command(ctx: &mut Ctx<'_>, channel_id: &str, command: &str) -> Result<()> {
    let team_id = require_channel(ctx, channel_id)?;
    // Direct and group channels run commands in the context of any team.
    let team_id = team_id.or_else(|| ctx.server.teams.keys().next().cloned());
    let command = if command.starts_with('/') {
        command.to_string()
    } else {
        format!("/{}", command)
    };
    let request = ctx
        .api()
        .execute_command(channel_id, team_id.as_deref(), &command);
    ctx.enqueue(
        request,
        Completion::Command {
            channel_id: channel_id.to_string(),
        },
    );
    Ok(())
}

pub fn react(ctx: &mut Ctx<'_>, post_id: &str, emoji: &str) -> Result<()> {
    require_post(ctx, post_id)?;
    let emoji = emoji.trim_matches(':');
    let request = ctx.api().save_reaction(ctx.server.me(), post_id, emoji, 0);
    ctx.enqueue(
        request,
        Completion::SaveReaction {
            post_id: post_id.to_string(),
        },
    );
    Ok(())
}

pub fn unreact(ctx: &mut Ctx<'_>, post_id: &str, emoji: &str) -> Result<()> {
    require_post(ctx, post_id)?;
    let emoji = emoji.trim_matches(':');
    let request = ctx.api().delete_reaction(post_id, emoji);
    ctx.enqueue(
        request,
        Completion::DeleteReaction {
            post_id: post_id.to_string(),
        },
    );
    Ok(())
}

pub fn delete_post(ctx: &mut Ctx<'_>, post_id: &str) -> Result<()> {
    require_post(ctx, post_id)?;
    let request = ctx.api().delete_post(post_id);
    ctx.enqueue(
        request,
        Completion::DeletePost {
            post_id: post_id.to_string(),
        },
    );
    Ok(())
}

pub fn fetch_file(ctx: &mut Ctx<'_>, file_id: &str) -> Result<()> {
    let request = ctx.api().file(file_id);
    ctx.enqueue(
        request,
        Completion::FetchFile {
            file_id: file_id.to_string(),
        },
    );
    Ok(())
}

/// Marks a channel read on the server, unless nothing arrived since the last time.
pub fn mark_read(ctx: &mut Ctx<'_>, channel_id: &str) {
    let Some(channel) = ctx.server.channel_mut(channel_id) else {
        return;
    };
    if !channel.has_unread() {
        trace!("{} has nothing new to mark read", channel_id);
        return;
    }
    channel.catch_up_read();
    let request = ctx.api().view_channel(channel_id);
    ctx.enqueue(
        request,
        Completion::ViewChannel {
            channel_id: channel_id.to_string(),
        },
    );
    let server = &*ctx.server;
    if let Some(channel) = server.channel(channel_id) {
        ctx.view.channel_read(&server.id, channel);
    }
}

/// Brings a channel to the foreground: mark it read and refresh its roster presence.
pub fn focus(ctx: &mut Ctx<'_>, channel_id: &str) -> Result<()> {
    require_channel(ctx, channel_id)?;
    mark_read(ctx, channel_id);
    let roster = roster(ctx, channel_id);
    hydration::request_presence(ctx, roster);
    Ok(())
}

/// Periodic presence refresh of the focused roster and direct message partners.
pub fn poll_presence(ctx: &mut Ctx<'_>) {
    let mut user_ids = ctx.server.direct_partners();
    if let Some(channel_id) = ctx.focused {
        user_ids.extend(roster(ctx, channel_id));
    }
    hydration::request_presence(ctx, user_ids);
}

fn roster(ctx: &Ctx<'_>, channel_id: &str) -> Vec<String> {
    ctx.server
        .channel(channel_id)
        .map(|c| c.members.iter().cloned().collect())
        .unwrap_or_default()
}

/// Returns the channel's team id.
fn require_channel(ctx: &Ctx<'_>, channel_id: &str) -> Result<Option<String>> {
    ctx.server
        .channel(channel_id)
        .map(|c| c.team_id.clone())
        .ok_or_else(|| SyncError::UnknownChannel(channel_id.to_string()))
}

fn require_post(ctx: &Ctx<'_>, post_id: &str) -> Result<()> {
    ctx.server
        .channel_of_post(post_id)
        .map(|_| ())
        .ok_or_else(|| SyncError::UnknownPost(post_id.to_string()))
}

pub fn on_action(ctx: &mut Ctx<'_>, completion: &Completion, result: Result<HttpResponse, RequestError>) {
    let what = match completion {
        Completion::CreatePost { .. } => "send the message",
        Completion::Command { .. } => "run the command",
        Completion::ViewChannel { .. } => "mark the channel read",
        Completion::SaveReaction { .. } => "add the reaction",
        Completion::DeleteReaction { .. } => "remove the reaction",
        Completion::DeletePost { .. } => "delete the post",
        _ => "complete the request",
    };
    match result {
        Ok(_) => debug!("{} did {:?}", ctx.server.id, completion),
        Err(e) => ctx.fail(&format!("could not {}: {}", what, e)),
    }
}

pub fn on_file(ctx: &mut Ctx<'_>, file_id: &str, result: Result<HttpResponse, RequestError>) {
    match result {
        Ok(response) => {
            debug!("Fetched file {} ({} bytes)", file_id, response.body.len());
            ctx.view.file_fetched(&ctx.server.id, file_id, response.body);
        }
        Err(e) => ctx.fail(&format!("could not fetch file {}: {}", file_id, e)),
    }
}
