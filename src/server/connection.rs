// Connection handling module
// Serves one accepted TCP connection as HTTP/1.1 or cleartext HTTP/2

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::h2c;
use crate::config::{AppState, PerformanceConfig};
use crate::handler;
use crate::logger;

/// Accept a connection, enforcing the connection limit.
///
/// # Arguments
///
/// * `stream` - The TCP stream to handle
/// * `peer_addr` - The peer's socket address
/// * `state` - Shared application state
pub fn accept_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
) {
    // Increment counter first, then check limit (prevents race condition)
    let prev_count = state.active_connections.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            state.active_connections.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection from {peer_addr} rejected."
            ));
            drop(stream);
            return;
        }
    }

    logger::log_connection_accepted(&peer_addr);
    handle_connection(stream, peer_addr, Arc::clone(state));
}

/// Build the protocol-sniffing connection builder.
///
/// Connections opening with the HTTP/2 preface are served as h2c, all
/// others as HTTP/1.1 until an `Upgrade: h2c` request switches them.
fn connection_builder(perf: &PerformanceConfig) -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());

    let mut http1 = builder.http1();
    http1.keep_alive(true);
    if perf.header_read_timeout > 0 {
        http1
            .timer(TokioTimer::new())
            .header_read_timeout(Duration::from_secs(perf.header_read_timeout));
    }

    builder
        .http2()
        .timer(TokioTimer::new())
        .max_concurrent_streams(perf.max_concurrent_streams);

    builder
}

/// Serve a single connection in a spawned task, then release its slot.
fn handle_connection(stream: tokio::net::TcpStream, peer_addr: SocketAddr, state: Arc<AppState>) {
    tokio::spawn(async move {
        if let Err(e) = stream.set_nodelay(true) {
            logger::log_debug(&format!("set_nodelay failed for {peer_addr}: {e}"));
        }
        let io = TokioIo::new(stream);
        let builder = connection_builder(&state.config.performance);

        let service_state = Arc::clone(&state);
        let service = service_fn(move |req: Request<Incoming>| {
            let state = Arc::clone(&service_state);
            async move {
                if h2c::is_upgrade_request(&req) {
                    h2c::upgrade(req, state, peer_addr).await
                } else {
                    handler::handle_request(req, state, peer_addr).await
                }
            }
        });

        if let Err(err) = builder.serve_connection_with_upgrades(io, service).await {
            logger::log_connection_error(&err);
        }

        state.active_connections.fetch_sub(1, Ordering::SeqCst);
    });
}
