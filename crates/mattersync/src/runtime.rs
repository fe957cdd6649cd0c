use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use mattersync_engine::error::Result as SyncResult;
use mattersync_engine::{Engine, Settings, SyncError};

use crate::commands::{self, Command};
use crate::http::{self, ReqwestTransport};
use crate::stream::TungsteniteConnector;
use crate::view::TracingView;

/// Queue drain and timer granularity.
const TICK: Duration = Duration::from_millis(200);

/// Upper bound on a logout call; disconnect proceeds either way.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

type App = Engine<TracingView>;

/// Drives the engine until ctrl-c or `quit`, then logs out of every server.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let client = Client::new();
    let (http_tx, mut http_rx) = mpsc::unbounded_channel();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();

    let mut engine = Engine::new(
        &settings,
        Box::new(ReqwestTransport::new(client.clone(), http_tx)),
        Box::new(TungsteniteConnector::new(ready_tx)),
        TracingView,
    );

    if settings.autoconnect.is_empty() {
        info!("Nothing to autoconnect. {}", commands::USAGE);
    }
    engine.autoconnect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = ticker.tick() => engine.tick(Instant::now()),
            Some((id, chunk, is_final)) = http_rx.recv() => {
                engine.on_response(id, chunk, is_final, Instant::now());
            }
            Some((server_id, worker_id)) = ready_rx.recv() => {
                engine.on_readable(&server_id, worker_id, Instant::now());
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match commands::parse(&line) {
                        Some(Command::Quit) => break,
                        Some(command) => {
                            if let Err(e) = execute(&mut engine, &client, command).await {
                                warn!("{}", e);
                            }
                        }
                        None => warn!("Unrecognised input. {}", commands::USAGE),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    disconnect_all(&mut engine, &client).await;
    Ok(())
}

async fn execute(engine: &mut App, client: &Client, command: Command) -> SyncResult<()> {
    let now = Instant::now();
    match command {
        Command::Connect { server } => engine.connect(&server),
        Command::Disconnect { server } => disconnect(engine, client, &server).await,
        Command::Focus { server, channel } => engine.focus_channel(&server, &channel, now),
        Command::Say {
            server,
            channel,
            message,
        } => engine.send_post(&server, &channel, &message, None, now),
        Command::Reply {
            server,
            channel,
            root,
            message,
        } => engine.send_post(&server, &channel, &message, Some(&root), now),
        Command::Run {
            server,
            channel,
            command,
        } => engine.execute_command(&server, &channel, &command, now),
        Command::React { server, post, emoji } => engine.react(&server, &post, &emoji, now),
        Command::Unreact { server, post, emoji } => engine.unreact(&server, &post, &emoji, now),
        Command::Delete { server, post } => engine.delete_post(&server, &post, now),
        Command::File { server, file } => engine.fetch_file(&server, &file, now),
        Command::Quit => Ok(()),
    }
}

/// Logs out, then tears the server down whatever the logout outcome.
async fn disconnect(engine: &mut App, client: &Client, server_id: &str) -> SyncResult<()> {
    let request = match engine.logout_request(server_id) {
        Ok(request) => request,
        // Never finished logging in: nothing to log out of.
        Err(SyncError::NotConnected(_)) => {
            engine.complete_disconnect(server_id, Ok(()));
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    info!("Disconnecting from {}", server_id);
    let outcome = http::execute(client, &request, LOGOUT_TIMEOUT).await;
    engine.complete_disconnect(server_id, outcome);
    Ok(())
}

/// Logs out of every server still holding a session, including those whose
/// reconnect attempts ran out.
async fn disconnect_all(engine: &mut App, client: &Client) {
    for server_id in engine.logged_in_servers() {
        if let Err(e) = disconnect(engine, client, &server_id).await {
            warn!("Failed to disconnect {}: {}", server_id, e);
        }
    }
}
