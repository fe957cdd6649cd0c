use bytes::Bytes;

use crate::graph::{Channel, Post, User};
use crate::worker::ConnectionState;

/// Receiver of every rendering side effect of the engine.
///
/// Methods are called synchronously from inside the engine and must not
/// call back into it.
pub trait ViewSink {
    /// `parent` is the thread root when it is known locally; otherwise the
    /// post renders flat.
    fn write_post(&mut self, server_id: &str, channel: &Channel, post: &Post, parent: Option<&Post>);

    fn edit_post(&mut self, server_id: &str, channel: &Channel, post: &Post);

    fn delete_post(&mut self, server_id: &str, channel: &Channel, post_id: &str);

    fn set_channel_properties(&mut self, server_id: &str, channel: &Channel, title: &str);

    fn add_reaction(&mut self, server_id: &str, channel: &Channel, post: &Post, user_id: &str, emoji: &str);

    fn remove_reaction(&mut self, server_id: &str, channel: &Channel, post: &Post, user_id: &str, emoji: &str);

    fn set_channel_loading(&mut self, server_id: &str, channel: &Channel, loading: bool);

    fn add_user(&mut self, server_id: &str, channel: &Channel, user: &User);

    fn remove_user(&mut self, server_id: &str, channel: &Channel, user_id: &str);

    fn server_status(&mut self, _server_id: &str, _state: ConnectionState) {}

    /// A user action or a background fetch failed.
    fn action_failed(&mut self, _server_id: &str, _message: &str) {}

    fn channel_read(&mut self, _server_id: &str, _channel: &Channel) {}

    fn presence_changed(&mut self, _server_id: &str, _user: &User) {}

    fn close_channel(&mut self, _server_id: &str, _channel_id: &str) {}

    fn file_fetched(&mut self, _server_id: &str, _file_id: &str, _data: Bytes) {}
}
