//! TCP server for partition function requests.
//!
//! Accepts connections and runs one dispatcher task per connection until a
//! client asks for shutdown (or the process is interrupted).

use crate::config::Config;
use crate::dispatcher::handle_connection;
use crate::engine::InferenceEngine;
use crate::error::ServerError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, Instrument};

/// Handle onto the server's one-way transition to shutting down.
///
/// Connections hold a clone; it does not own the listener, it only tells the
/// accept loop to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    latched: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        ShutdownHandle {
            token: CancellationToken::new(),
            latched: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start shutting down. Returns `true` only for the first caller.
    pub fn trigger(&self) -> bool {
        if self.latched.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Server instance
pub struct Server {
    config: Config,
    engine: Arc<dyn InferenceEngine>,
    shutdown: ShutdownHandle,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, engine: Arc<dyn InferenceEngine>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            engine,
            shutdown: ShutdownHandle::new(),
            connection_limit,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Bind the configured listen address.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.listen;
        let listener =
            create_listener(addr, self.config.backlog).map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        Ok(TcpListener::from_std(listener)?)
    }

    /// Bind and serve until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown, then wait for every
    /// open connection to finish.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        info!(address = %listener.local_addr()?, "Server listening");

        let mut connections = JoinSet::new();

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(res) = connections.join_next() => {
                    if let Err(e) = res {
                        error!(error = %e, "Connection task panicked");
                    }
                }

                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "New connection");

                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }

                        let engine = Arc::clone(&self.engine);
                        let shutdown = self.shutdown.clone();
                        let max_line_length = self.config.max_line_length;

                        connections.spawn(
                            async move {
                                if let Err(e) =
                                    handle_connection(stream, engine, shutdown, max_line_length).await
                                {
                                    debug!(error = %e, "Connection error");
                                }
                                drop(permit);
                            }
                            .instrument(debug_span!("connection", peer = %peer)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(listener);
        info!("Listener closed, waiting for open connections");

        while let Some(res) = connections.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Connection task panicked");
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Create a nonblocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
