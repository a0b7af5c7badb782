// bidboard entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not the terminal)
// 2. Load config
// 3. Load or create the local identity
// 4. Start the auction session (initial load, channel, reconciliation)
// 5. Run the presenter until Ctrl+C
// 6. Teardown

use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use bidboard::config;
use bidboard::identity;
use bidboard::session::AuctionSession;
use bidboard::transport::WsConnector;
use bidboard::ui;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing (the terminal belongs to the presenter)
    init_tracing()?;
    info!("bidboard starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "config loaded: socket={}, api={}",
        config.server.socket_url, config.server.api_url
    );

    // 3. Local identity (must exist before the channel starts)
    let identity = identity::load_or_create().context("failed to load local identity")?;
    info!("bidding as {identity}");

    // 4. Start the session
    let connector = WsConnector::new(config.server.socket_url.clone());
    let (mut session, notifications) =
        AuctionSession::start(&config, identity.clone(), connector).await;

    // 5. Run the presenter until Ctrl+C (or until the session ends)
    let items = session.items();
    let clock = session.clock();
    let render_interval = Duration::from_millis(config.ui.render_interval_ms);
    let mut ui_task = tokio::spawn(ui::run(notifications, items, clock, identity, render_interval));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        result = &mut ui_task => {
            if let Ok(Err(e)) = result {
                error!("presenter error: {e}");
            }
        }
    }

    // 6. Teardown: close the channel, drain the reconciler, stop the presenter
    session.shutdown().await;
    ui_task.abort();

    info!("bidboard shut down cleanly");
    Ok(())
}

/// Initialize tracing to a log file (the terminal is used by the presenter).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("bidboard.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bidboard=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
