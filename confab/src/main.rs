//! Confab media relay server
//!
//! Routes voice, camera, and screen-share media between the members of
//! a room and carries the signaling the clients negotiate over.

mod config;
mod logging;
mod server;
mod ws;

use anyhow::Context;
use tracing::{error, info};

use confab_sfu::{RoomRegistry, WorkerPool};
use confab_signaling::Gateway;

use crate::config::AppConfig;
use crate::server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config =
        AppConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    logging::init_logging(&config.logging).context("failed to initialize logging")?;

    info!(
        workers = config.sfu.workers,
        max_participants_per_room = config.sfu.max_participants_per_room,
        "Starting media relay"
    );

    let pool = WorkerPool::new(&config.sfu);
    let registry = RoomRegistry::new(pool.clone(), &config.sfu);
    let gateway = Gateway::new(registry);
    let state = AppState { gateway };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Relay listening");

    // Worker death is unrecoverable: media state on that worker is
    // gone, so the process restarts instead of limping on.
    let mut fatal = pool.subscribe_fatal();
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
            worker = async {
                loop {
                    if fatal.changed().await.is_err() {
                        return None;
                    }
                    let worker = *fatal.borrow();
                    if worker.is_some() {
                        return worker;
                    }
                }
            } => {
                if let Some(worker) = worker {
                    error!(worker, "Media worker died; shutting down");
                }
            }
        }
    };

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server error")?;

    info!("Relay stopped");
    Ok(())
}
