use std::collections::BTreeMap;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::{ServerConfig, Settings};
use crate::error::{Result, SyncError};
use crate::graph::Server;
use crate::queue::RequestQueue;
use crate::session::Completion;
use crate::view::ViewSink;
use crate::worker::ConnectionState;

/// Configured servers and the live state of the connected ones.
#[derive(Default)]
pub struct Registry {
    configs: BTreeMap<String, ServerConfig>,
    autoconnect: Vec<String>,
    pub(crate) servers: BTreeMap<String, Server>,
}

impl Registry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            configs: settings.servers.clone(),
            autoconnect: settings.autoconnect.clone(),
            servers: BTreeMap::new(),
        }
    }

    /// Adds or replaces a server configuration. Takes effect on the next connect.
    pub fn configure(&mut self, config: ServerConfig) {
        self.configs.insert(config.id.clone(), config);
    }

    pub fn config(&self, id: &str) -> Option<&ServerConfig> {
        self.configs.get(id)
    }

    pub fn autoconnect_ids(&self) -> &[String] {
        &self.autoconnect
    }

    pub fn server(&self, id: &str) -> Option<&Server> {
        self.servers.get(id)
    }

    pub fn server_mut(&mut self, id: &str) -> Option<&mut Server> {
        self.servers.get_mut(id)
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.servers
            .get(id)
            .is_some_and(|s| s.state != ConnectionState::Disconnected)
    }

    /// Checks that `id` can be connected and returns its configuration.
    ///
    /// Nothing here touches the network.
    pub fn prepare_connect(&self, id: &str) -> Result<ServerConfig> {
        let config = self
            .configs
            .get(id)
            .ok_or_else(|| SyncError::UnknownServer(id.to_string()))?;
        config.validate()?;
        if self.is_connected(id) {
            return Err(SyncError::AlreadyConnected(id.to_string()));
        }
        Ok(config.clone())
    }

    pub fn insert(&mut self, server: Server) {
        self.servers.insert(server.id.clone(), server);
    }

    pub fn remove(&mut self, id: &str) -> Option<Server> {
        self.servers.remove(id)
    }
}

/// Runs the configured 2FA command and returns the token it prints.
///
/// A failing command is reported and login proceeds without a token.
pub fn retrieve_2fa_token(config: &ServerConfig) -> Option<String> {
    let command = config.command_2fa.as_deref()?;
    debug!("Running 2FA command for {}", config.id);
    match Command::new("sh").arg("-c").arg(command).output() {
        Ok(output) if output.status.success() => {
            let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Some(token).filter(|t| !t.is_empty())
        }
        Ok(output) => {
            warn!("2FA command for {} exited with {}", config.id, output.status);
            None
        }
        Err(e) => {
            warn!("Failed to run 2FA command for {}: {}", config.id, e);
            None
        }
    }
}

/// Drops everything a server owns: worker, queued jobs and entity graph.
pub fn teardown(server: &mut Server, queue: &mut RequestQueue<Completion>, view: &mut dyn ViewSink) {
    info!("Unloading {}", server.id);
    if let Some(mut worker) = server.worker.take() {
        worker.close();
    }
    let purged = queue.purge_session(server.session);
    if purged > 0 {
        debug!("Dropped {} pending requests of {}", purged, server.id);
    }
    for channel_id in server.clear_graph() {
        view.close_channel(&server.id, &channel_id);
    }
    server.token = None;
    server.next_reconnect = None;
    server.next_status_poll = None;
    server.reconnect_attempts = 0;
    if server.state != ConnectionState::Disconnected {
        server.state = ConnectionState::Disconnected;
        view.server_status(&server.id, ConnectionState::Disconnected);
    }
}
