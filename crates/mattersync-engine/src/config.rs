use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Connection settings for one remote server, read once at connect time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub url: String,
    pub username: String,
    pub password: String,
    /// Shell command printing a one-time MFA token on stdout.
    pub command_2fa: Option<String>,
}

impl ServerConfig {
    /// Missing url/username/password is a local error; nothing reaches the network.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.url.trim().is_empty() {
            missing.push("url");
        }
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(SyncError::Configuration(format!(
                "server {} is not fully configured (missing {})",
                self.id,
                missing.join(", ")
            )));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(SyncError::Configuration(format!(
                "server {} url must start with http:// or https://",
                self.id
            )));
        }
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }
}

/// How the reconnection loop spaces its attempts.
///
/// The default keeps the fixed 5 second retry with no cap the client has
/// always had; backoff and an attempt limit are opt-in.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            backoff_multiplier: 1.0,
            max_interval: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(64) as i32);
        let delay = self.interval.as_secs_f64() * factor;
        let cap = self.max_interval.max(self.interval);
        Duration::from_secs_f64(delay.min(cap.as_secs_f64()))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub status_poll_interval: Duration,
    /// How many times a failed post page is retried before giving up.
    pub page_retries: u8,
    pub reconnect: ReconnectPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            status_poll_interval: Duration::from_secs(60),
            page_retries: 2,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub servers: BTreeMap<String, ServerConfig>,
    pub autoconnect: Vec<String>,
    pub engine: EngineSettings,
}

const PREFIX: &str = "MATTERSYNC";

fn list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            SyncError::Configuration(format!("{} has an invalid value: {}", key, raw))
        }),
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, keyed like the environment variables.
    ///
    /// Servers are listed in `MATTERSYNC_SERVERS`; each server `id` then reads
    /// `MATTERSYNC_SERVER_<ID>_URL`, `_USERNAME`, `_PASSWORD` and `_COMMAND_2FA`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{}_{}", PREFIX, suffix));

        let mut servers = BTreeMap::new();
        for id in list(get("SERVERS")) {
            let key = id.to_uppercase().replace(['-', '.'], "_");
            let field = |name: &str| get(&format!("SERVER_{}_{}", key, name));
            servers.insert(
                id.clone(),
                ServerConfig {
                    id: id.clone(),
                    url: field("URL").unwrap_or_default(),
                    username: field("USERNAME").unwrap_or_default(),
                    password: field("PASSWORD").unwrap_or_default(),
                    command_2fa: field("COMMAND_2FA").filter(|c| !c.trim().is_empty()),
                },
            );
        }

        let autoconnect = list(get("AUTOCONNECT"));
        for id in &autoconnect {
            if !servers.contains_key(id) {
                return Err(SyncError::Configuration(format!(
                    "autoconnect lists unknown server {}",
                    id
                )));
            }
        }

        let mut engine = EngineSettings::default();
        let secs = |suffix: &str| -> Result<Option<Duration>> {
            let key = format!("{}_{}", PREFIX, suffix);
            Ok(parse::<u64>(&key, lookup(&key))?.map(Duration::from_secs))
        };
        if let Some(d) = secs("HEARTBEAT_SECS")? {
            engine.heartbeat_interval = d;
        }
        if let Some(d) = secs("REQUEST_TIMEOUT_SECS")? {
            engine.request_timeout = d;
        }
        if let Some(d) = secs("RECONNECT_INTERVAL_SECS")? {
            engine.reconnect.interval = d;
            engine.reconnect.max_interval = engine.reconnect.max_interval.max(d);
        }
        if let Some(d) = secs("RECONNECT_MAX_SECS")? {
            engine.reconnect.max_interval = d;
        }
        let key = format!("{}_RECONNECT_BACKOFF", PREFIX);
        if let Some(m) = parse::<f64>(&key, lookup(&key))? {
            engine.reconnect.backoff_multiplier = m;
        }
        let key = format!("{}_RECONNECT_MAX_ATTEMPTS", PREFIX);
        engine.reconnect.max_attempts = parse::<u32>(&key, lookup(&key))?.filter(|n| *n > 0);

        Ok(Self {
            servers,
            autoconnect,
            engine,
        })
    }
}
