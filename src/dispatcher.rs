//! Per-connection command dispatch.
//!
//! Reads one line at a time, answers it with exactly one response line and
//! applies the lifecycle action the command asks for. A command is only
//! started once the previous response has been flushed.

use crate::engine::InferenceEngine;
use crate::protocol::{Command, Response};
use crate::server::ShutdownHandle;
use futures::{SinkExt, StreamExt};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, trace, warn};

/// Serve one connection until the peer leaves, a terminal command is
/// processed, the channel fails, or the server shuts down.
pub async fn handle_connection<S>(
    stream: S,
    engine: Arc<dyn InferenceEngine>,
    shutdown: ShutdownHandle,
    max_line_length: usize,
) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(max_line_length));

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Server shutting down, closing connection");
                return Ok(());
            }
            next = framed.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => return channel_failure(&mut framed, e).await,
            None => {
                trace!("Connection closed by client");
                return Ok(());
            }
        };

        let command = Command::parse(&line);
        trace!(?command, "Processing command");

        let response = match command {
            Command::Empty => Response::NoFileGiven,
            Command::Close => Response::Closed,
            Command::Shutdown => Response::ShuttingDown,
            Command::Evaluate(path) => evaluate(&engine, path).await,
        };

        // `send` resolves only once the line has been flushed to the socket.
        framed.send(response.to_string()).await?;

        match response {
            Response::Closed => {
                debug!("Client requested close");
                SinkExt::<String>::close(&mut framed).await?;
                return Ok(());
            }
            Response::ShuttingDown => {
                let closed = SinkExt::<String>::close(&mut framed).await;
                if shutdown.trigger() {
                    debug!("Client requested server shutdown");
                }
                return closed;
            }
            _ => {}
        }
    }
}

/// Run the engine on the blocking pool so a slow model never stalls
/// other connections or the accept loop.
async fn evaluate(engine: &Arc<dyn InferenceEngine>, path: &str) -> Response {
    let engine = Arc::clone(engine);
    let model = PathBuf::from(path);

    match tokio::task::spawn_blocking(move || engine.evaluate(&model)).await {
        Ok(Ok(value)) => Response::Value(value),
        Ok(Err(e)) => {
            warn!(model = path, error = %e, "Evaluation failed");
            Response::CalcErr
        }
        Err(e) => {
            error!(model = path, error = %e, "Inference engine crashed");
            Response::Err
        }
    }
}

/// Report an unexpected failure with a best-effort `ERR` and give the
/// connection up.
async fn channel_failure<S>(
    framed: &mut Framed<S, LinesCodec>,
    e: LinesCodecError,
) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match &e {
        LinesCodecError::Io(io_err) if is_normal_disconnect(io_err) => {
            debug!(error = %e, "Connection dropped by peer");
            return Ok(());
        }
        _ => warn!(error = %e, "Connection failure"),
    }

    if let Err(write_err) = framed.send(Response::Err.to_string()).await {
        debug!(error = %write_err, "Could not report failure to peer");
    }
    Err(e)
}

fn is_normal_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
