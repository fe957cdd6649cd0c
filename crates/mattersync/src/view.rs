use bytes::Bytes;
use tracing::{debug, info, warn};

use mattersync_engine::graph::{Channel, Post, User};
use mattersync_engine::{ConnectionState, ViewSink};

/// Renders engine output as log lines.
#[derive(Default)]
pub struct TracingView;

fn author(post: &Post) -> &str {
    post.username_override.as_deref().unwrap_or(&post.user_id)
}

impl ViewSink for TracingView {
    fn write_post(&mut self, server_id: &str, channel: &Channel, post: &Post, parent: Option<&Post>) {
        let thread = parent.map(|p| format!(" (re {})", p.id)).unwrap_or_default();
        info!(
            "[{}/{}] {} {}{}: {}",
            server_id,
            channel.name,
            post.created_at.format("%H:%M"),
            author(post),
            thread,
            post.message
        );
    }

    fn edit_post(&mut self, server_id: &str, channel: &Channel, post: &Post) {
        info!("[{}/{}] {} edited {}: {}", server_id, channel.name, author(post), post.id, post.message);
    }

    fn delete_post(&mut self, server_id: &str, channel: &Channel, post_id: &str) {
        info!("[{}/{}] post {} deleted", server_id, channel.name, post_id);
    }

    fn set_channel_properties(&mut self, server_id: &str, channel: &Channel, title: &str) {
        let muted = if channel.muted { " (muted)" } else { "" };
        info!("[{}] channel {} is {}{}", server_id, channel.id, title, muted);
    }

    fn add_reaction(&mut self, server_id: &str, channel: &Channel, post: &Post, user_id: &str, emoji: &str) {
        debug!("[{}/{}] {} reacted :{}: to {}", server_id, channel.name, user_id, emoji, post.id);
    }

    fn remove_reaction(&mut self, server_id: &str, channel: &Channel, post: &Post, user_id: &str, emoji: &str) {
        debug!("[{}/{}] {} removed :{}: from {}", server_id, channel.name, user_id, emoji, post.id);
    }

    fn set_channel_loading(&mut self, server_id: &str, channel: &Channel, loading: bool) {
        debug!("[{}/{}] loading={}", server_id, channel.name, loading);
    }

    fn add_user(&mut self, server_id: &str, channel: &Channel, user: &User) {
        debug!("[{}/{}] {} joined", server_id, channel.name, user.username);
    }

    fn remove_user(&mut self, server_id: &str, channel: &Channel, user_id: &str) {
        debug!("[{}/{}] {} left", server_id, channel.name, user_id);
    }

    fn server_status(&mut self, server_id: &str, state: ConnectionState) {
        info!("[{}] {}", server_id, state);
    }

    fn action_failed(&mut self, server_id: &str, message: &str) {
        warn!("[{}] {}", server_id, message);
    }

    fn presence_changed(&mut self, server_id: &str, user: &User) {
        debug!(
            "[{}] {} is {}",
            server_id,
            user.username,
            user.status.as_deref().unwrap_or("unknown")
        );
    }

    fn close_channel(&mut self, server_id: &str, channel_id: &str) {
        info!("[{}] closed {}", server_id, channel_id);
    }

    fn file_fetched(&mut self, server_id: &str, file_id: &str, data: Bytes) {
        info!("[{}] file {} ({} bytes)", server_id, file_id, data.len());
    }
}
