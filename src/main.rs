//! partition-server: a line-protocol partition function server
//!
//! Clients send one model file path per line and get back the logarithm of
//! the model's partition function, as computed by an external inference
//! tool. Control lines:
//! - `CLOSE`: close this connection
//! - `SHUTDOWN`: close this connection and stop the server
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod dispatcher;
mod engine;
mod error;
mod protocol;
mod server;

use config::Config;
use engine::CommandEngine;
use server::Server;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = ?config.workers,
        max_connections = config.max_connections,
        engine = %config.engine_command.join(" "),
        "Starting partition-server"
    );

    let engine = CommandEngine::new(&config.engine_command, config.engine_pattern.clone())
        .ok_or("engine command must name a program")?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers.max(1));
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async move {
        let server = Server::new(config, Arc::new(engine));

        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    shutdown.trigger();
                }
                Err(e) => warn!(error = %e, "Failed to listen for interrupt signal"),
            }
        });

        server.run().await
    })?;

    Ok(())
}
