// Server loop module
// Accepts connections until a shutdown signal or a fatal accept error

use std::io::ErrorKind;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::connection::accept_connection;
use super::signal::shutdown_signal;
use crate::config::AppState;
use crate::logger;

/// Accept loop owning the listener for the rest of the process
///
/// Returns `Ok(())` after SIGINT/SIGTERM. Accept errors that only concern
/// the pending connection are logged and skipped; any other accept error
/// means the listener is unusable and is returned to the caller.
pub async fn run(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => accept_connection(stream, peer_addr, &state),
                    Err(e) if is_transient(e.kind()) => {
                        logger::log_warning(&format!("Failed to accept connection: {e}"));
                    }
                    Err(e) => return Err(format!("listener failed: {e}").into()),
                }
            }

            signal = &mut shutdown => {
                logger::log_shutdown(signal?);
                return Ok(());
            }
        }
    }
}

/// Errors tied to a single pending connection rather than the listener
const fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
