//! Builders for every REST call the engine makes.

use serde::Serialize;

use mattersync_types::api::{
    CreatePostRequest, ExecuteCommandRequest, LoginRequest, SaveReactionRequest,
    ViewChannelRequest,
};

use crate::transport::{HttpRequest, Method};

pub const USERS_PER_PAGE: usize = 60;
pub const MEMBERS_PER_PAGE: usize = 200;
pub const CHANNEL_MEMBERSHIPS_PER_PAGE: usize = 100;

/// Request factory bound to one server's base URL and token.
#[derive(Debug, Clone, Copy)]
pub struct Api<'a> {
    base: &'a str,
    token: Option<&'a str>,
}

impl<'a> Api<'a> {
    pub fn new(base: &'a str, token: Option<&'a str>) -> Self {
        Self { base, token }
    }

    fn request(&self, method: Method, path: &str, body: Option<String>) -> HttpRequest {
        HttpRequest {
            method,
            url: format!("{}/api/v4{}", self.base, path),
            bearer: self.token.map(str::to_string),
            body,
        }
    }

    fn get(&self, path: &str) -> HttpRequest {
        self.request(Method::Get, path, None)
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> HttpRequest {
        // Plain structs of strings and integers always serialize.
        let body = serde_json::to_string(body).unwrap_or_default();
        self.request(Method::Post, path, Some(body))
    }

    fn delete(&self, path: &str) -> HttpRequest {
        self.request(Method::Delete, path, None)
    }

    // -- Auth --

    pub fn login(&self, username: &str, password: &str, token: Option<String>) -> HttpRequest {
        let mut request = self.post(
            "/users/login",
            &LoginRequest {
                login_id: username.to_string(),
                password: password.to_string(),
                token,
            },
        );
        request.bearer = None;
        request
    }

    pub fn logout(&self) -> HttpRequest {
        self.request(Method::Post, "/users/logout", None)
    }

    // -- Users --

    pub fn users_page(&self, page: usize) -> HttpRequest {
        self.get(&format!("/users?page={}&per_page={}", page, USERS_PER_PAGE))
    }

    pub fn user(&self, user_id: &str) -> HttpRequest {
        self.get(&format!("/users/{}", user_id))
    }

    pub fn preferences(&self) -> HttpRequest {
        self.get("/users/me/preferences")
    }

    pub fn users_status(&self, user_ids: &[String]) -> HttpRequest {
        self.post("/users/status/ids", &user_ids)
    }

    // -- Teams --

    pub fn my_teams(&self) -> HttpRequest {
        self.get("/users/me/teams")
    }

    pub fn team(&self, team_id: &str) -> HttpRequest {
        self.get(&format!("/teams/{}", team_id))
    }

    pub fn team_channels(&self, team_id: &str) -> HttpRequest {
        self.get(&format!("/users/me/teams/{}/channels", team_id))
    }

    // -- Channels --

    pub fn channel(&self, channel_id: &str) -> HttpRequest {
        self.get(&format!("/channels/{}", channel_id))
    }

    pub fn channel_members_page(&self, channel_id: &str, page: usize) -> HttpRequest {
        self.get(&format!(
            "/channels/{}/members?page={}&per_page={}",
            channel_id, page, MEMBERS_PER_PAGE
        ))
    }

    pub fn my_channel_members_page(&self, page: usize) -> HttpRequest {
        self.get(&format!(
            "/users/me/channel_members?page={}&pageSize={}",
            page, CHANNEL_MEMBERSHIPS_PER_PAGE
        ))
    }

    pub fn view_channel(&self, channel_id: &str) -> HttpRequest {
        self.post(
            "/channels/members/me/view",
            &ViewChannelRequest {
                channel_id: channel_id.to_string(),
            },
        )
    }

    // -- Posts --

    pub fn unread_posts(&self, channel_id: &str) -> HttpRequest {
        self.get(&format!(
            "/users/me/channels/{}/posts/unread?limit_after=1",
            channel_id
        ))
    }

    pub fn posts_after(&self, channel_id: &str, post_id: &str) -> HttpRequest {
        self.get(&format!("/channels/{}/posts?after={}", channel_id, post_id))
    }

    pub fn create_post(&self, channel_id: &str, message: &str, root_id: Option<&str>) -> HttpRequest {
        self.post(
            "/posts",
            &CreatePostRequest {
                channel_id: channel_id.to_string(),
                message: message.to_string(),
                root_id: root_id.map(str::to_string),
            },
        )
    }

    pub fn execute_command(&self, channel_id: &str, team_id: Option<&str>, command: &str) -> HttpRequest {
        self.post(
            "/commands/execute",
            &ExecuteCommandRequest {
                channel_id: channel_id.to_string(),
                team_id: team_id.map(str::to_string),
                command: command.to_string(),
            },
        )
    }

    pub fn delete_post(&self, post_id: &str) -> HttpRequest {
        self.delete(&format!("/posts/{}", post_id))
    }

    // -- Reactions --

    pub fn save_reaction(&self, user_id: &str, post_id: &str, emoji: &str, create_at: i64) -> HttpRequest {
        self.post(
            "/reactions",
            &SaveReactionRequest {
                user_id: user_id.to_string(),
                post_id: post_id.to_string(),
                emoji_name: emoji.to_string(),
                create_at,
            },
        )
    }

    pub fn delete_reaction(&self, post_id: &str, emoji: &str) -> HttpRequest {
        self.delete(&format!("/users/me/posts/{}/reactions/{}", post_id, emoji))
    }

    // -- Files --

    pub fn file(&self, file_id: &str) -> HttpRequest {
        self.get(&format!("/files/{}", file_id))
    }
}
