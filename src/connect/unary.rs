//! Unary request pipeline
//!
//! Validates the Connect protocol headers, reads the body under a size cap,
//! decodes it, runs the procedure (under the client deadline, if any) and
//! encodes the reply.

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::time::Duration;

use super::codec::{Codec, RpcMessage, SUPPORTED_CONTENT_TYPES};
use super::error::{Code, ConnectError};
use super::message::{RpcRequest, RpcResponse};
use crate::http;

const PROTOCOL_VERSION_HEADER: &str = "connect-protocol-version";
const TIMEOUT_HEADER: &str = "connect-timeout-ms";

/// Only protocol version spoken by this server
const PROTOCOL_VERSION: &str = "1";

/// Longest accepted `Connect-Timeout-Ms` value, in digits
const MAX_TIMEOUT_DIGITS: usize = 10;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Encoded reply of a procedure: response headers and body bytes
pub type EncodedReply = (HeaderMap, Vec<u8>);

/// Type-erased unary procedure stored in a service's dispatch table
pub trait Procedure: Send + Sync {
    fn call(
        &self,
        headers: HeaderMap,
        codec: Codec,
        payload: Bytes,
    ) -> BoxFuture<'_, Result<EncodedReply, ConnectError>>;
}

/// Adapts a typed async function into a [`Procedure`]
pub struct UnaryHandler<Req, Res, F> {
    func: F,
    _types: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res, F> UnaryHandler<Req, Res, F> {
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _types: PhantomData,
        }
    }
}

impl<Req, Res, F, Fut> Procedure for UnaryHandler<Req, Res, F>
where
    Req: RpcMessage,
    Res: RpcMessage,
    F: Fn(RpcRequest<Req>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RpcResponse<Res>, ConnectError>> + Send + 'static,
{
    fn call(
        &self,
        headers: HeaderMap,
        codec: Codec,
        payload: Bytes,
    ) -> BoxFuture<'_, Result<EncodedReply, ConnectError>> {
        let message = match codec.decode::<Req>(&payload) {
            Ok(m) => m,
            Err(e) => return Box::pin(std::future::ready(Err(e))),
        };
        let reply = (self.func)(RpcRequest::new(headers, message));

        Box::pin(async move {
            let (headers, message) = reply.await?.into_parts();
            Ok((headers, codec.encode(&message)?))
        })
    }
}

/// Serve one unary call against `procedure`
pub async fn serve_unary<B>(
    procedure: &dyn Procedure,
    parts: Parts,
    body: B,
    max_body_size: usize,
) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if parts.method != Method::POST {
        return http::build_405_response("POST");
    }

    let codec = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(Codec::from_content_type);
    let Some(codec) = codec else {
        return http::build_415_response(SUPPORTED_CONTENT_TYPES);
    };

    match invoke(procedure, parts.headers, body, codec, max_body_size).await {
        Ok((headers, payload)) => build_reply(codec, headers, payload),
        Err(e) => {
            let message = format!("[rpc] {} failed: {e}", parts.uri.path());
            match e.code() {
                Code::Unknown | Code::Internal | Code::DataLoss => {
                    crate::logger::log_warning(&message);
                }
                _ => crate::logger::log_debug(&message),
            }
            e.into_response()
        }
    }
}

async fn invoke<B>(
    procedure: &dyn Procedure,
    headers: HeaderMap,
    body: B,
    codec: Codec,
    max_body_size: usize,
) -> Result<EncodedReply, ConnectError>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    check_protocol_version(&headers)?;
    check_content_encoding(&headers)?;
    let timeout = parse_timeout(&headers)?;
    let payload = read_body(body, max_body_size).await?;

    let call = procedure.call(headers, codec, payload);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            ConnectError::new(Code::DeadlineExceeded, "the operation timed out")
        })?,
        None => call.await,
    }
}

fn check_protocol_version(headers: &HeaderMap) -> Result<(), ConnectError> {
    match headers.get(PROTOCOL_VERSION_HEADER) {
        None => Ok(()),
        Some(v) if v.as_bytes() == PROTOCOL_VERSION.as_bytes() => Ok(()),
        Some(v) => Err(ConnectError::new(
            Code::InvalidArgument,
            format!(
                "{PROTOCOL_VERSION_HEADER} must be {PROTOCOL_VERSION:?}: got {:?}",
                String::from_utf8_lossy(v.as_bytes())
            ),
        )),
    }
}

fn check_content_encoding(headers: &HeaderMap) -> Result<(), ConnectError> {
    match headers.get(CONTENT_ENCODING) {
        None => Ok(()),
        Some(v) if v.as_bytes().eq_ignore_ascii_case(b"identity") => Ok(()),
        Some(v) => Err(ConnectError::new(
            Code::Unimplemented,
            format!(
                "unknown compression {:?}: supported encodings are identity",
                String::from_utf8_lossy(v.as_bytes())
            ),
        )),
    }
}

/// Parse `Connect-Timeout-Ms`: 1 to 10 ASCII digits
fn parse_timeout(headers: &HeaderMap) -> Result<Option<Duration>, ConnectError> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    let raw = value.as_bytes();
    if raw.is_empty() || raw.len() > MAX_TIMEOUT_DIGITS || !raw.iter().all(u8::is_ascii_digit) {
        return Err(ConnectError::new(
            Code::InvalidArgument,
            format!(
                "protocol error: invalid timeout {:?}",
                String::from_utf8_lossy(raw)
            ),
        ));
    }
    // At most 10 digits, always fits in u64
    let millis = raw
        .iter()
        .fold(0_u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    Ok(Some(Duration::from_millis(millis)))
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, ConnectError>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ConnectError::new(
            Code::ResourceExhausted,
            format!("message is larger than configured max {limit}"),
        )),
        Err(e) => Err(ConnectError::new(
            Code::Unknown,
            format!("read request body: {e}"),
        )),
    }
}

fn build_reply(codec: Codec, mut headers: HeaderMap, payload: Vec<u8>) -> Response<Full<Bytes>> {
    headers.remove(CONTENT_TYPE);
    headers.remove(CONTENT_LENGTH);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, codec.content_type())
        .body(Full::new(Bytes::from(payload)))
        .unwrap_or_else(|e| {
            crate::logger::log_error(&format!("Failed to build RPC response: {e}"));
            Response::new(Full::new(Bytes::new()))
        });
    response.headers_mut().extend(headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use hyper::Request;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Ping {
        #[prost(string, tag = "1")]
        #[serde(default, skip_serializing_if = "String::is_empty")]
        text: String,
    }

    fn upper() -> impl Procedure {
        UnaryHandler::new(|req: RpcRequest<Ping>| async move {
            let mut resp = RpcResponse::new(Ping {
                text: req.into_message().text.to_uppercase(),
            });
            resp.headers_mut()
                .insert("x-handled-by", HeaderValue::from_static("upper"));
            Ok::<_, ConnectError>(resp)
        })
    }

    fn slow() -> impl Procedure {
        UnaryHandler::new(|_req: RpcRequest<Ping>| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ConnectError>(RpcResponse::new(Ping::default()))
        })
    }

    fn request(content_type: &str) -> hyper::http::request::Builder {
        Request::builder()
            .method(Method::POST)
            .uri("/ping.PingService/Upper")
            .header(CONTENT_TYPE, content_type)
    }

    async fn serve(
        procedure: &dyn Procedure,
        builder: hyper::http::request::Builder,
        body: &'static [u8],
    ) -> (StatusCode, HeaderMap, Bytes) {
        let req = builder.body(Full::new(Bytes::from_static(body))).unwrap();
        let (parts, body) = req.into_parts();
        let resp = serve_unary(procedure, parts, body, 64).await;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes)
    }

    #[tokio::test]
    async fn test_json_call() {
        let body = br#"{"text":"hello"}"#;
        let (status, headers, bytes) =
            serve(&upper(), request("application/json"), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-handled-by"], "upper");
        assert_eq!(&bytes[..], br#"{"text":"HELLO"}"#);
    }

    #[tokio::test]
    async fn test_proto_call() {
        let body = b"\x0a\x02hi";
        let (status, headers, bytes) =
            serve(&upper(), request("application/proto"), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/proto");
        assert_eq!(&bytes[..], b"\x0a\x02HI");
    }

    #[tokio::test]
    async fn test_get_is_not_allowed() {
        let builder = Request::builder()
            .method(Method::GET)
            .uri("/ping.PingService/Upper");
        let (status, headers, _) = serve(&upper(), builder, b"").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers["allow"], "POST");
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let (status, headers, _) = serve(&upper(), request("text/plain"), b"hi").await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(headers["accept-post"], SUPPORTED_CONTENT_TYPES);
    }

    #[tokio::test]
    async fn test_bad_protocol_version() {
        let body = br#"{"text":"a"}"#;
        let builder = request("application/json").header(PROTOCOL_VERSION_HEADER, "2");
        let (status, _, bytes) = serve(&upper(), builder, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_protocol_version_one_accepted() {
        let body = br#"{"text":"a"}"#;
        let builder = request("application/json").header(PROTOCOL_VERSION_HEADER, "1");
        let (status, _, _) = serve(&upper(), builder, body).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_compressed_request_is_unimplemented() {
        let body = br#"{"text":"a"}"#;
        let builder = request("application/json").header(CONTENT_ENCODING, "gzip");
        let (status, _, bytes) = serve(&upper(), builder, body).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        let err: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err["code"], "unimplemented");
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let body = b"not json";
        let (status, headers, bytes) =
            serve(&upper(), request("application/json"), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        let err: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let body: &'static [u8] = &[b'a'; 100];
        let (status, _, bytes) = serve(&upper(), request("application/proto"), body).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let err: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err["code"], "resource_exhausted");
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let body = br#"{"text":"a"}"#;
        let builder = request("application/json").header(TIMEOUT_HEADER, "10");
        let (status, _, bytes) = serve(&slow(), builder, body).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        let err: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(err["code"], "deadline_exceeded");
    }

    #[test]
    fn test_parse_timeout() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_timeout(&headers).unwrap(), None);

        headers.insert(TIMEOUT_HEADER, HeaderValue::from_static("1500"));
        assert_eq!(
            parse_timeout(&headers).unwrap(),
            Some(Duration::from_millis(1500))
        );

        headers.insert(TIMEOUT_HEADER, HeaderValue::from_static("9999999999"));
        assert!(parse_timeout(&headers).is_ok());

        for bad in ["", "-1", "1.5", "10s", "12345678901"] {
            headers.insert(TIMEOUT_HEADER, HeaderValue::from_static(bad));
            let err = parse_timeout(&headers).unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "value {bad:?}");
        }
    }
}
