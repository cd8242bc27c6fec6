//! HTTP response building module
//!
//! Plain HTTP answers produced outside the RPC codec: unknown routes, wrong
//! methods, unsupported media types, CORS rejections and protocol upgrades.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

fn plain(status: StatusCode) -> hyper::http::response::Builder {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
}

fn finish(
    builder: hyper::http::response::Builder,
    label: &str,
    text: &'static str,
) -> Response<Full<Bytes>> {
    builder
        .body(Full::new(Bytes::from_static(text.as_bytes())))
        .unwrap_or_else(|e| {
            log_build_error(label, &e);
            Response::new(Full::new(Bytes::from_static(text.as_bytes())))
        })
}

/// Build 404 Not Found response
pub fn build_404_response() -> Response<Full<Bytes>> {
    let text = "404 page not found\n";
    finish(plain(StatusCode::NOT_FOUND), "404", text)
}

/// Build 403 Forbidden response (origin refused by the CORS policy)
pub fn build_403_response() -> Response<Full<Bytes>> {
    let text = "403 origin not allowed\n";
    finish(plain(StatusCode::FORBIDDEN), "403", text)
}

/// Build 405 Method Not Allowed response
pub fn build_405_response(allow: &str) -> Response<Full<Bytes>> {
    let text = "405 method not allowed\n";
    let builder = plain(StatusCode::METHOD_NOT_ALLOWED).header("Allow", allow);
    finish(builder, "405", text)
}

/// Build 415 Unsupported Media Type response
pub fn build_415_response(accept_post: &str) -> Response<Full<Bytes>> {
    let text = "415 unsupported media type\n";
    let builder =
        plain(StatusCode::UNSUPPORTED_MEDIA_TYPE).header("Accept-Post", accept_post);
    finish(builder, "415", text)
}

/// Build 400 Bad Request response
pub fn build_400_response() -> Response<Full<Bytes>> {
    let text = "400 bad request\n";
    finish(plain(StatusCode::BAD_REQUEST), "400", text)
}

/// Build 413 Payload Too Large response
pub fn build_413_response() -> Response<Full<Bytes>> {
    let text = "413 request entity too large\n";
    finish(plain(StatusCode::PAYLOAD_TOO_LARGE), "413", text)
}

/// Build 101 Switching Protocols response accepting an `Upgrade` to `protocol`
pub fn build_101_response(protocol: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("Connection", "Upgrade")
        .header("Upgrade", protocol)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("101", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build empty 204 response used to answer CORS preflights
pub fn build_204_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("204", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_404_response() {
        let resp = build_404_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");
    }

    #[test]
    fn test_405_response_lists_allowed_method() {
        let resp = build_405_response("POST");
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()["allow"], "POST");
    }

    #[test]
    fn test_415_response_lists_accepted_types() {
        let resp = build_415_response("application/json, application/proto");
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(
            resp.headers()["accept-post"],
            "application/json, application/proto"
        );
    }

    #[test]
    fn test_413_response() {
        let resp = build_413_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_101_response_names_protocol() {
        let resp = build_101_response("h2c");
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(resp.headers()["connection"], "Upgrade");
        assert_eq!(resp.headers()["upgrade"], "h2c");
    }

    #[test]
    fn test_204_response_is_empty() {
        let resp = build_204_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.headers().get("content-type").is_none());
    }
}
