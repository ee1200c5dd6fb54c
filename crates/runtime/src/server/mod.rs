//! HTTP front end for the bot.

mod error;
mod router;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tracing::info;

use mesh_config::ServerConfig;

use crate::bot::MeshBot;

pub use error::ApiError;
pub use router::{DEFAULT_CHANNEL, build_router};

pub struct HttpServer {
    config: ServerConfig,
    bot: Arc<MeshBot>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, bot: Arc<MeshBot>) -> Self {
        Self { config, bot }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn build_router(&self) -> Router {
        router::build_router(self.bot.clone())
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.build_router();
        let addr = self.addr();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("HTTP server shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(?err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
