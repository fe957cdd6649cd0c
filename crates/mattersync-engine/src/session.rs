use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::endpoints::Api;
use crate::error::{RequestError, StreamError};
use crate::graph::Server;
use crate::queue::{Finished, Job, RequestQueue};
use crate::transport::{HttpRequest, HttpResponse};
use crate::view::ViewSink;
use crate::worker::{ConnectionState, StreamConnector, Worker};
use crate::{actions, hydration};

/// Tag carried by every queued job, naming the handler for its outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Login,
    Users { page: usize },
    Preferences,
    Teams,
    Team,
    TeamChannels { team_id: String },
    Channel,
    ChannelMembers { channel_id: String, page: usize },
    MyChannelMembers { page: usize },
    UnreadPosts { channel_id: String, attempt: u8 },
    PostsAfter { channel_id: String, after: String, attempt: u8 },
    User,
    UsersStatus,
    CreatePost { channel_id: String },
    Command { channel_id: String },
    ViewChannel { channel_id: String },
    SaveReaction { post_id: String },
    DeleteReaction { post_id: String },
    DeletePost { post_id: String },
    FetchFile { file_id: String },
}

/// What the engine must do once a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum After {
    Continue,
    /// Login was rejected; drop the server.
    RemoveServer,
}

/// Borrowed view of the engine scoped to one server.
pub struct Ctx<'a> {
    pub server: &'a mut Server,
    pub queue: &'a mut RequestQueue<Completion>,
    pub view: &'a mut dyn ViewSink,
    pub connector: &'a mut dyn StreamConnector,
    pub settings: &'a EngineSettings,
    /// Channel of this server currently in the foreground.
    pub focused: Option<&'a str>,
    pub now: Instant,
}

impl Ctx<'_> {
    pub fn api(&self) -> Api<'_> {
        Api::new(self.server.config.base_url(), self.server.token.as_deref())
    }

    pub fn enqueue(&mut self, request: HttpRequest, completion: Completion) {
        self.queue.enqueue(Job {
            server_id: self.server.id.clone(),
            session: self.server.session,
            request,
            completion,
        });
    }

    /// Logs a failure and surfaces it through the view.
    pub fn fail(&mut self, message: &str) {
        warn!("{}: {}", self.server.id, message);
        self.view.action_failed(&self.server.id, message);
    }

    pub fn is_focused(&self, channel_id: &str) -> bool {
        self.focused == Some(channel_id)
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.server.state != state {
            info!("{} is {}", self.server.id, state);
            self.server.state = state;
            self.view.server_status(&self.server.id, state);
        }
    }

    /// Opens a fresh stream, retiring the current one first.
    pub fn open_stream(&mut self) {
        if let Some(mut old) = self.server.worker.take() {
            old.close();
        }
        let token = self.server.token.clone().unwrap_or_default();
        let opened = Worker::open(
            &mut *self.connector,
            &self.server.id,
            self.server.config.base_url(),
            &token,
            self.now,
            self.settings.heartbeat_interval,
        );
        match opened {
            Ok(worker) => {
                self.server.worker = Some(worker);
                self.set_state(ConnectionState::Connecting);
            }
            Err(e) => {
                warn!("{}: {}", self.server.id, e);
                self.schedule_reconnect(false);
            }
        }
    }

    /// The link reported a completed handshake.
    pub fn stream_opened(&mut self) {
        self.server.reconnect_attempts = 0;
        self.server.next_reconnect = None;
        self.set_state(ConnectionState::Open);
        if std::mem::take(&mut self.server.resync_pending) {
            hydration::resync(self);
        }
    }

    /// Tears the worker down and arms the reconnection timer.
    pub fn connection_lost(&mut self, error: StreamError) {
        warn!("{} lost its stream: {}", self.server.id, error);
        let was_open = self
            .server
            .worker
            .take()
            .map(|mut worker| {
                worker.close();
                worker.is_opened()
            })
            .unwrap_or(false);
        self.schedule_reconnect(was_open);
    }

    fn schedule_reconnect(&mut self, was_open: bool) {
        if was_open {
            self.server.reconnect_attempts = 0;
        } else {
            self.server.reconnect_attempts += 1;
        }
        let settings = self.settings;
        let policy = &settings.reconnect;
        if policy.exhausted(self.server.reconnect_attempts) {
            self.server.next_reconnect = None;
            self.set_state(ConnectionState::Disconnected);
            let message = format!(
                "giving up after {} reconnection attempts",
                self.server.reconnect_attempts
            );
            self.fail(&message);
            return;
        }
        let delay = policy.delay_for_attempt(self.server.reconnect_attempts.saturating_sub(1));
        debug!("{} reconnecting in {:?}", self.server.id, delay);
        self.server.next_reconnect = Some(self.now + delay);
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Called by the timer once the reconnection delay has elapsed.
    pub fn reconnect(&mut self) {
        info!("Reconnecting {}", self.server.id);
        self.server.next_reconnect = None;
        self.server.resync_pending = true;
        self.open_stream();
    }
}

/// Routes a finished job to its handler.
pub fn complete(ctx: &mut Ctx<'_>, finished: Finished<Completion>) -> After {
    let Finished {
        completion, result, ..
    } = finished;
    debug!("{} completed {:?} ok={}", ctx.server.id, completion, result.is_ok());
    dispatch(ctx, completion, result)
}

fn dispatch(ctx: &mut Ctx<'_>, completion: Completion, result: Result<HttpResponse, RequestError>) -> After {
    match completion {
        Completion::Login => return hydration::on_login(ctx, result),
        Completion::Users { page } => hydration::on_users(ctx, page, result),
        Completion::Preferences => hydration::on_preferences(ctx, result),
        Completion::Teams => hydration::on_teams(ctx, result),
        Completion::Team => hydration::on_team(ctx, result),
        Completion::TeamChannels { team_id } => hydration::on_team_channels(ctx, &team_id, result),
        Completion::Channel => hydration::on_channel(ctx, result),
        Completion::ChannelMembers { channel_id, page } => {
            hydration::on_channel_members(ctx, &channel_id, page, result)
        }
        Completion::MyChannelMembers { page } => hydration::on_my_channel_members(ctx, page, result),
        Completion::UnreadPosts { channel_id, attempt } => {
            hydration::on_posts(ctx, &channel_id, None, attempt, result)
        }
        Completion::PostsAfter {
            channel_id,
            after,
            attempt,
        } => hydration::on_posts(ctx, &channel_id, Some(after), attempt, result),
        Completion::User => hydration::on_user(ctx, result),
        Completion::UsersStatus => hydration::on_users_status(ctx, result),
        Completion::FetchFile { file_id } => actions::on_file(ctx, &file_id, result),
        Completion::CreatePost { .. }
        | Completion::Command { .. }
        | Completion::ViewChannel { .. }
        | Completion::SaveReaction { .. }
        | Completion::DeleteReaction { .. }
        | Completion::DeletePost { .. } => actions::on_action(ctx, &completion, result),
    }
    After::Continue
}
