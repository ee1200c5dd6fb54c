pub mod bot;
mod cleanup;
pub mod persona;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use mesh_config::AppConfig;

pub use bot::{BotReply, MeshBot};
pub use cleanup::spawn_cleanup_task;
pub use persona::build_system_prompt;
pub use server::{ApiError, HttpServer, build_router, shutdown_signal};

/// Run the bot as an HTTP service until Ctrl-C or SIGTERM.
///
/// Owns the retention task: it starts with the server and is stopped once
/// the server has drained.
pub async fn run_server(config: AppConfig) -> Result<()> {
    let cleanup_interval = Duration::from_secs(config.memory.cleanup_interval_hours.max(1) * 60 * 60);
    let server_config = config.server.clone();
    let bot = Arc::new(MeshBot::from_config(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = spawn_cleanup_task(bot.memory().clone(), cleanup_interval, shutdown_rx);

    let server = HttpServer::new(server_config, bot);
    let served = server.run(shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = cleanup.await {
        warn!(?err, "cleanup task ended abnormally");
    }
    info!("server stopped");
    served
}
