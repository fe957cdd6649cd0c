use std::time::Duration;

use thiserror::Error;

/// Failure of a single queued HTTP job. Only the job's own completion sees it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RequestError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Failure of the event stream. Never fatal: it moves the server to Reconnecting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("no pong received since the last ping")]
    HeartbeatTimeout,

    #[error("could not open stream: {0}")]
    Connect(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown server {0}")]
    UnknownServer(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("server {0} is already connected")]
    AlreadyConnected(String),

    #[error("server {0} is not connected")]
    NotConnected(String),

    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("unknown post {0}")]
    UnknownPost(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
