use serde::Serialize;

// -- Auth --

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub login_id: String,
    pub password: String,
    /// One-time code when the account has MFA enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

// -- Posts --

#[derive(Debug, Clone, Serialize)]
pub struct CreatePostRequest {
    pub channel_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCommandRequest {
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub command: String,
}

// -- Channels --

#[derive(Debug, Clone, Serialize)]
pub struct ViewChannelRequest {
    pub channel_id: String,
}

// -- Reactions --

#[derive(Debug, Clone, Serialize)]
pub struct SaveReactionRequest {
    pub user_id: String,
    pub post_id: String,
    pub emoji_name: String,
    pub create_at: i64,
}
