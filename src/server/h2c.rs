// Cleartext HTTP/2 upgrade module
// Switches an HTTP/1.1 connection to HTTP/2 on `Upgrade: h2c`
//
// The upgrading request becomes stream 1 of the new connection. Its headers
// and body are replayed to the HTTP/2 server as the frames the client would
// have sent, ahead of the client's own bytes.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    AsHeaderName, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, UPGRADE,
};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{HeaderMap, Request, Response, Version};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::AppState;
use crate::handler;
use crate::http;
use crate::logger;

const HTTP2_SETTINGS: &str = "http2-settings";

/// Client connection preface (RFC 9113 section 3.4)
const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;
/// Initial SETTINGS_MAX_FRAME_SIZE
const MAX_FRAME_SIZE: usize = 16_384;
/// Initial flow-control window; the replayed body must fit in it
const MAX_UPGRADE_BODY: usize = 65_535;

const FRAME_DATA: u8 = 0x0;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_SETTINGS: u8 = 0x4;
const FLAG_END_STREAM: u8 = 0x1;
const FLAG_ACK: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

/// base64url, padding optional
const SETTINGS_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Headers that only make sense on the HTTP/1.1 hop
const HOP_HEADERS: [&str; 8] = [
    "connection",
    "upgrade",
    HTTP2_SETTINGS,
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
];

/// True for an HTTP/1.1 request asking to switch to h2c
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let headers = req.headers();
    req.version() == Version::HTTP_11
        && has_token(headers, UPGRADE, "h2c")
        && has_token(headers, CONNECTION, "upgrade")
        && has_token(headers, CONNECTION, HTTP2_SETTINGS)
        && headers.get_all(HTTP2_SETTINGS).iter().count() == 1
}

fn has_token(headers: &HeaderMap, name: impl AsHeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Answer an upgrade request with 101 and continue the connection as HTTP/2
///
/// Requests that cannot be replayed (malformed `HTTP2-Settings`, oversized
/// header block or body) are served as plain HTTP/1.1 instead.
pub async fn upgrade(
    mut req: Request<Incoming>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let Some((settings, header_block)) = prepare(&req) else {
        logger::log_debug(&format!(
            "[h2c] Upgrade from {peer_addr} declined, serving as HTTP/1.1"
        ));
        return handler::handle_request(req, state, peer_addr).await;
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    let body = match Limited::new(req.into_body(), MAX_UPGRADE_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Ok(http::build_413_response());
        }
        Err(e) => {
            logger::log_warning(&format!("[h2c] Failed to read upgrade request body: {e}"));
            return Ok(http::build_400_response());
        }
    };
    let prelude = client_prelude(&settings, &header_block, &body);

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => serve_upgraded(upgraded, prelude, state, peer_addr).await,
            Err(e) => logger::log_connection_error(&e),
        }
    });

    logger::log_debug(&format!("[h2c] Upgrading connection from {peer_addr}"));
    Ok(http::build_101_response("h2c"))
}

/// Decoded settings payload and stream 1 header block, if replayable
fn prepare<B>(req: &Request<B>) -> Option<(Vec<u8>, Vec<u8>)> {
    let settings = decode_settings(req.headers().get(HTTP2_SETTINGS)?.as_bytes())?;

    if let Some(length) = req.headers().get(CONTENT_LENGTH) {
        let length: usize = length.to_str().ok()?.trim().parse().ok()?;
        if length > MAX_UPGRADE_BODY {
            return None;
        }
    }

    let block = header_block(req);
    (block.len() <= MAX_FRAME_SIZE).then_some((settings, block))
}

/// `HTTP2-Settings` value to a SETTINGS frame payload
fn decode_settings(value: &[u8]) -> Option<Vec<u8>> {
    let payload = SETTINGS_ENGINE.decode(value).ok()?;
    (payload.len() % 6 == 0).then_some(payload)
}

/// HPACK block for the upgrading request, literals only
fn header_block<B>(req: &Request<B>) -> Vec<u8> {
    let authority = req
        .headers()
        .get(HOST)
        .map(HeaderValue::as_bytes)
        .or_else(|| req.uri().authority().map(|a| a.as_str().as_bytes()))
        .unwrap_or_default();
    let path = req
        .uri()
        .path_and_query()
        .map_or("/", hyper::http::uri::PathAndQuery::as_str);

    let mut block = Vec::new();
    encode_literal(&mut block, b":method", req.method().as_str().as_bytes());
    encode_literal(&mut block, b":scheme", b"http");
    encode_literal(&mut block, b":authority", authority);
    encode_literal(&mut block, b":path", path.as_bytes());
    for (name, value) in req.headers() {
        if !is_hop_header(name) {
            encode_literal(&mut block, name.as_str().as_bytes(), value.as_bytes());
        }
    }
    block
}

fn is_hop_header(name: &HeaderName) -> bool {
    HOP_HEADERS.contains(&name.as_str())
}

/// Literal header field without indexing, new name, no Huffman coding
fn encode_literal(block: &mut Vec<u8>, name: &[u8], value: &[u8]) {
    block.push(0x00);
    encode_string(block, name);
    encode_string(block, value);
}

fn encode_string(block: &mut Vec<u8>, s: &[u8]) {
    encode_integer(block, s.len(), 7, 0x00);
    block.extend_from_slice(s);
}

/// HPACK integer with an N-bit prefix (RFC 7541 section 5.1)
#[allow(clippy::cast_possible_truncation)]
fn encode_integer(block: &mut Vec<u8>, value: usize, prefix_bits: u32, flags: u8) {
    let max = (1_usize << prefix_bits) - 1;
    if value < max {
        block.push(flags | value as u8);
        return;
    }
    block.push(flags | max as u8);
    let mut rest = value - max;
    while rest >= 0x80 {
        block.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    block.push(rest as u8);
}

/// Preface, SETTINGS, then stream 1 HEADERS and DATA
fn client_prelude(settings: &[u8], header_block: &[u8], body: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(
        PREFACE.len() + 3 * FRAME_HEADER_LEN + settings.len() + header_block.len() + body.len(),
    );
    out.extend_from_slice(PREFACE);
    push_frame(&mut out, FRAME_SETTINGS, 0, 0, settings);

    let header_flags = if body.is_empty() {
        FLAG_END_HEADERS | FLAG_END_STREAM
    } else {
        FLAG_END_HEADERS
    };
    push_frame(&mut out, FRAME_HEADERS, header_flags, 1, header_block);

    let mut chunks = body.chunks(MAX_FRAME_SIZE).peekable();
    while let Some(chunk) = chunks.next() {
        let flags = if chunks.peek().is_none() {
            FLAG_END_STREAM
        } else {
            0
        };
        push_frame(&mut out, FRAME_DATA, flags, 1, chunk);
    }
    Bytes::from(out)
}

/// Payloads never exceed `MAX_FRAME_SIZE`
fn push_frame(out: &mut Vec<u8>, kind: u8, flags: u8, stream_id: u32, payload: &[u8]) {
    let length = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&length.to_be_bytes()[1..]);
    out.push(kind);
    out.push(flags);
    out.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(payload);
}

async fn serve_upgraded(
    upgraded: Upgraded,
    prelude: Bytes,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) {
    state.active_connections.fetch_add(1, Ordering::SeqCst);

    let io = TokioIo::new(H2cStream::new(TokioIo::new(upgraded), prelude));
    let mut builder = http2::Builder::new(TokioExecutor::new());
    builder
        .timer(TokioTimer::new())
        .max_concurrent_streams(state.config.performance.max_concurrent_streams);

    let service_state = Arc::clone(&state);
    let service = service_fn(move |req| {
        handler::handle_request(req, Arc::clone(&service_state), peer_addr)
    });

    if let Err(err) = builder.serve_connection(io, service).await {
        logger::log_connection_error(&err);
    }

    state.active_connections.fetch_sub(1, Ordering::SeqCst);
}

/// Write-side frame scanner
#[derive(Debug)]
enum AckFilter {
    /// Collecting the next frame header
    Header { head: [u8; FRAME_HEADER_LEN], len: usize },
    /// Passing through the payload of the current frame
    Payload(usize),
    /// First SETTINGS ACK removed, everything passes
    Done,
}

impl AckFilter {
    const fn header() -> Self {
        Self::Header {
            head: [0; FRAME_HEADER_LEN],
            len: 0,
        }
    }
}

/// Upgraded connection as seen by the HTTP/2 server
///
/// Reads yield the replayed prelude, then the client's bytes with its own
/// connection preface removed. Writes pass through, except the first
/// SETTINGS ACK: it answers the replayed SETTINGS frame, which the client
/// never sent.
struct H2cStream<T> {
    inner: T,
    prelude: Bytes,
    preface_left: usize,
    filter: AckFilter,
    /// Frame header bytes accepted from the writer, not yet written
    pending: Vec<u8>,
}

impl<T> H2cStream<T> {
    const fn new(inner: T, prelude: Bytes) -> Self {
        Self {
            inner,
            prelude,
            preface_left: PREFACE.len(),
            filter: AckFilter::header(),
            pending: Vec::new(),
        }
    }
}

impl<T: AsyncWrite + Unpin> H2cStream<T> {
    fn poll_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.drain(..n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for H2cStream<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if !this.prelude.is_empty() {
            let n = this.prelude.len().min(buf.remaining());
            buf.put_slice(&this.prelude.split_to(n));
            return Poll::Ready(Ok(()));
        }

        while this.preface_left > 0 {
            let mut scratch = [0_u8; PREFACE.len()];
            let mut preface = ReadBuf::new(&mut scratch[..this.preface_left]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut preface))?;
            let got = preface.filled();
            if got.is_empty() {
                return Poll::Ready(Ok(()));
            }
            let offset = PREFACE.len() - this.preface_left;
            if !PREFACE[offset..].starts_with(got) {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "h2c: client did not send the HTTP/2 connection preface",
                )));
            }
            this.preface_left -= got.len();
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for H2cStream<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        ready!(this.poll_pending(cx))?;

        match &mut this.filter {
            AckFilter::Done => Pin::new(&mut this.inner).poll_write(cx, buf),
            AckFilter::Payload(left) => {
                let n = (*left).min(buf.len());
                let written = ready!(Pin::new(&mut this.inner).poll_write(cx, &buf[..n]))?;
                *left -= written;
                if *left == 0 {
                    this.filter = AckFilter::header();
                }
                Poll::Ready(Ok(written))
            }
            AckFilter::Header { head, len } => {
                let n = (FRAME_HEADER_LEN - *len).min(buf.len());
                head[*len..*len + n].copy_from_slice(&buf[..n]);
                *len += n;
                if *len == FRAME_HEADER_LEN {
                    let head = *head;
                    this.filter = after_header(head, &mut this.pending);
                }
                Poll::Ready(Ok(n))
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_pending(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        ready!(this.poll_pending(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Decide the fate of a complete frame header
fn after_header(head: [u8; FRAME_HEADER_LEN], pending: &mut Vec<u8>) -> AckFilter {
    if head[3] == FRAME_SETTINGS && head[4] & FLAG_ACK != 0 {
        return AckFilter::Done;
    }
    pending.extend_from_slice(&head);
    let length = usize::from(head[0]) << 16 | usize::from(head[1]) << 8 | usize::from(head[2]);
    if length == 0 {
        AckFilter::header()
    } else {
        AckFilter::Payload(length)
    }
}
