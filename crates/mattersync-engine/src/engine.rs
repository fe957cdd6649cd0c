use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::actions;
use crate::config::{EngineSettings, ServerConfig, Settings};
use crate::endpoints::Api;
use crate::error::{RequestError, Result, SyncError};
use crate::graph::Server;
use crate::queue::{Finished, Job, RequestQueue};
use crate::reconciler;
use crate::registry::{self, Registry};
use crate::session::{self, After, Completion, Ctx};
use crate::transport::{Chunk, HttpRequest, HttpTransport, RequestId};
use crate::view::ViewSink;
use crate::worker::{ConnectionState, Received, StreamConnector, WorkerId};

/// The synchronization engine.
///
/// Owns every server, the request queue and the I/O seams. It never blocks
/// and never spawns; the runtime drives it through [`Engine::tick`],
/// [`Engine::on_readable`] and [`Engine::on_response`].
pub struct Engine<V: ViewSink> {
    registry: Registry,
    queue: RequestQueue<Completion>,
    transport: Box<dyn HttpTransport>,
    connector: Box<dyn StreamConnector>,
    view: V,
    settings: EngineSettings,
    /// (server id, channel id) in the foreground.
    focus: Option<(String, String)>,
}

impl<V: ViewSink> Engine<V> {
    pub fn new(
        settings: &Settings,
        transport: Box<dyn HttpTransport>,
        connector: Box<dyn StreamConnector>,
        view: V,
    ) -> Self {
        Self {
            registry: Registry::new(settings),
            queue: RequestQueue::new(settings.engine.request_timeout),
            transport,
            connector,
            view,
            settings: settings.engine.clone(),
            focus: None,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn server(&self, id: &str) -> Option<&Server> {
        self.registry.server(id)
    }

    pub fn configure(&mut self, config: ServerConfig) {
        self.registry.configure(config);
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Servers that are not Disconnected.
    pub fn connected_servers(&self) -> Vec<String> {
        self.registry
            .server_ids()
            .into_iter()
            .filter(|id| self.registry.is_connected(id))
            .collect()
    }

    /// Servers holding a session token, whatever their connection state.
    pub fn logged_in_servers(&self) -> Vec<String> {
        self.registry
            .server_ids()
            .into_iter()
            .filter(|id| self.registry.server(id).is_some_and(|s| s.token.is_some()))
            .collect()
    }

    pub fn focused(&self) -> Option<(&str, &str)> {
        self.focus.as_ref().map(|(s, c)| (s.as_str(), c.as_str()))
    }

    fn with_server<R>(&mut self, server_id: &str, now: Instant, f: impl FnOnce(&mut Ctx<'_>) -> R) -> Option<R> {
        let Self {
            registry,
            queue,
            connector,
            view,
            settings,
            focus,
            ..
        } = self;
        let server = registry.servers.get_mut(server_id)?;
        let focused = focus
            .as_ref()
            .filter(|(s, _)| s == server_id)
            .map(|(_, c)| c.as_str());
        let mut ctx = Ctx {
            server,
            queue,
            view,
            connector: connector.as_mut(),
            settings,
            focused,
            now,
        };
        Some(f(&mut ctx))
    }

    // -- Registry --

    /// Starts connecting `id`: validates its configuration and queues the login.
    pub fn connect(&mut self, id: &str) -> Result<()> {
        let config = self.registry.prepare_connect(id)?;
        if let Some(mut stale) = self.registry.remove(id) {
            registry::teardown(&mut stale, &mut self.queue, &mut self.view);
        }

        let mfa_token = registry::retrieve_2fa_token(&config);
        if config.command_2fa.is_some() && mfa_token.is_none() {
            self.view.action_failed(id, "failed to retrieve 2FA token");
        }

        let mut server = Server::new(config);
        info!("Connecting to {}", id);
        server.state = ConnectionState::Connecting;
        self.view.server_status(id, ConnectionState::Connecting);

        let request = Api::new(server.config.base_url(), None).login(
            &server.config.username,
            &server.config.password,
            mfa_token,
        );
        self.queue.enqueue(Job {
            server_id: server.id.clone(),
            session: server.session,
            request,
            completion: Completion::Login,
        });
        self.registry.insert(server);
        Ok(())
    }

    /// Connects every server listed for autoconnect. Returns the failures.
    pub fn autoconnect(&mut self) -> Vec<SyncError> {
        let ids = self.registry.autoconnect_ids().to_vec();
        let mut errors = Vec::new();
        for id in ids {
            if let Err(e) = self.connect(&id) {
                warn!("Autoconnect of {} failed: {}", id, e);
                errors.push(e);
            }
        }
        errors
    }

    /// The logout call for `id`, performed by the runtime outside the queue.
    ///
    /// `NotConnected` means there is no session to log out of; the server
    /// can be torn down directly.
    pub fn logout_request(&self, id: &str) -> Result<HttpRequest> {
        let server = self
            .registry
            .server(id)
            .ok_or_else(|| SyncError::UnknownServer(id.to_string()))?;
        let token = server
            .token
            .as_deref()
            .ok_or_else(|| SyncError::NotConnected(id.to_string()))?;
        Ok(Api::new(server.config.base_url(), Some(token)).logout())
    }

    /// Tears `id` down once the logout call returned, whatever its outcome.
    pub fn complete_disconnect(&mut self, id: &str, logout: std::result::Result<(), RequestError>) {
        if let Err(e) = logout {
            warn!("Logout from {} failed: {}", id, e);
        }
        if let Some(mut server) = self.registry.remove(id) {
            registry::teardown(&mut server, &mut self.queue, &mut self.view);
        }
        if self.focus.as_ref().is_some_and(|(s, _)| s == id) {
            self.focus = None;
        }
    }

    // -- Driving --

    /// Timer entry point: queue, heartbeats, reconnection and presence polling.
    pub fn tick(&mut self, now: Instant) {
        if let Some(expired) = self.queue.drain(now, self.transport.as_mut()) {
            self.complete(expired, now);
        }

        let poll_interval = self.settings.status_poll_interval;
        for id in self.registry.server_ids() {
            self.with_server(&id, now, |ctx| {
                let beat = ctx.server.worker.as_mut().map(|w| w.heartbeat(now));
                if let Some(Err(e)) = beat {
                    ctx.connection_lost(e);
                }

                let due = ctx.server.next_reconnect.is_some_and(|at| at <= now);
                if ctx.server.state == ConnectionState::Reconnecting && due {
                    ctx.reconnect();
                }

                if ctx.server.state == ConnectionState::Open {
                    match ctx.server.next_status_poll {
                        None => ctx.server.next_status_poll = Some(now + poll_interval),
                        Some(at) if at <= now => {
                            ctx.server.next_status_poll = Some(now + poll_interval);
                            actions::poll_presence(ctx);
                        }
                        Some(_) => {}
                    }
                }
            });
        }
    }

    /// HTTP entry point: one chunk of the response to request `id`.
    pub fn on_response(&mut self, id: RequestId, chunk: Chunk, is_final: bool, now: Instant) {
        if let Some(finished) = self.queue.buffered_response(id, chunk, is_final) {
            self.complete(finished, now);
        }
    }

    /// Stream entry point: the link of `worker_id` has frames to read.
    pub fn on_readable(&mut self, server_id: &str, worker_id: WorkerId, now: Instant) {
        self.with_server(server_id, now, |ctx| {
            let Some(worker) = ctx.server.worker.as_mut().filter(|w| w.id == worker_id) else {
                trace!("Ignoring readiness of retired stream {}", worker_id);
                return;
            };
            for item in worker.receive(now) {
                match item {
                    Received::Opened => ctx.stream_opened(),
                    Received::Event(event) => reconciler::apply(ctx, event),
                    Received::Lost(e) => ctx.connection_lost(e),
                }
            }
        });
    }

    fn complete(&mut self, finished: Finished<Completion>, now: Instant) {
        let server_id = finished.server_id.clone();
        let session = finished.session;
        let after = self.with_server(&server_id, now, |ctx| {
            if ctx.server.session != session {
                debug!("Dropping {:?} of a previous session of {}", finished.completion, server_id);
                return After::Continue;
            }
            session::complete(ctx, finished)
        });
        if after == Some(After::RemoveServer) {
            if let Some(mut server) = self.registry.remove(&server_id) {
                registry::teardown(&mut server, &mut self.queue, &mut self.view);
            }
        }
    }

    // -- User actions --

    fn act(
        &mut self,
        server_id: &str,
        now: Instant,
        f: impl FnOnce(&mut Ctx<'_>) -> Result<()>,
    ) -> Result<()> {
        let server = self
            .registry
            .server(server_id)
            .ok_or_else(|| SyncError::UnknownServer(server_id.to_string()))?;
        if server.token.is_none() {
            return Err(SyncError::NotConnected(server_id.to_string()));
        }
        self.with_server(server_id, now, f)
            .unwrap_or_else(|| Err(SyncError::UnknownServer(server_id.to_string())))
    }

    pub fn send_post(
        &mut self,
        server_id: &str,
        channel_id: &str,
        message: &str,
        root_id: Option<&str>,
        now: Instant,
    ) -> Result<()> {
        self.act(server_id, now, |ctx| actions::send_post(ctx, channel_id, message, root_id))
    }

    pub fn execute_command(
        &mut self,
        server_id: &str,
        channel_id: &str,
        command: &str,
        now: Instant,
    ) -> Result<()> {
        self.act(server_id, now, |ctx| actions::execute_command(ctx, channel_id, command))
    }

    pub fn react(&mut self, server_id: &str, post_id: &str, emoji: &str, now: Instant) -> Result<()> {
        self.act(server_id, now, |ctx| actions::react(ctx, post_id, emoji))
    }

    pub fn unreact(&mut self, server_id: &str, post_id: &str, emoji: &str, now: Instant) -> Result<()> {
        self.act(server_id, now, |ctx| actions::unreact(ctx, post_id, emoji))
    }

    pub fn delete_post(&mut self, server_id: &str, post_id: &str, now: Instant) -> Result<()> {
        self.act(server_id, now, |ctx| actions::delete_post(ctx, post_id))
    }

    pub fn fetch_file(&mut self, server_id: &str, file_id: &str, now: Instant) -> Result<()> {
        self.act(server_id, now, |ctx| actions::fetch_file(ctx, file_id))
    }

    /// Foregrounds a channel. Its posts are marked read as they arrive.
    pub fn focus_channel(&mut self, server_id: &str, channel_id: &str, now: Instant) -> Result<()> {
        let previous = self
            .focus
            .replace((server_id.to_string(), channel_id.to_string()));
        let result = self.act(server_id, now, |ctx| actions::focus(ctx, channel_id));
        if result.is_err() {
            self.focus = previous;
        }
        result
    }
}
