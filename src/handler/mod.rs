//! Request handler module
//!
//! Entry point for every HTTP request: applies the CORS policy, dispatches
//! through the multiplexer and writes the access log.

pub mod cors;
pub mod mux;

pub use cors::Cors;
pub use mux::ServeMux;

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderName, ORIGIN, REFERER, USER_AGENT};
use hyper::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppState;
use crate::logger::{self, AccessLogEntry};

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let entry = state
        .config
        .logging
        .access_log
        .then(|| start_entry(&req, peer_addr));

    let max_body_size = state.config.max_body_size();
    let response = state
        .cors
        .handle(req, |req| state.mux.dispatch(req, max_body_size))
        .await;

    if let Some(mut entry) = entry {
        entry.status = response.status().as_u16();
        entry.body_bytes = response
            .body()
            .size_hint()
            .exact()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

fn start_entry<B>(req: &Request<B>, peer_addr: SocketAddr) -> AccessLogEntry {
    let header = |name: HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    let mut entry = AccessLogEntry::new(
        peer_addr.to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.http_version = AccessLogEntry::version_label(req.version()).to_string();
    entry.origin = header(ORIGIN);
    entry.referer = header(REFERER);
    entry.user_agent = header(USER_AGENT);
    entry
}
