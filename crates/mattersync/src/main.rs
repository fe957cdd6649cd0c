use tracing::info;

use mattersync_engine::Settings;

mod commands;
mod http;
mod runtime;
mod stream;
mod view;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mattersync=debug,mattersync_engine=debug".into()),
        )
        .init();

    // Config
    let settings = Settings::from_env()?;
    info!(
        "Loaded {} servers, autoconnecting {}",
        settings.servers.len(),
        settings.autoconnect.len()
    );

    runtime::run(settings).await
}
