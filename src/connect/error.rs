//! Connect error model
//!
//! Every failure on the RPC path is a [`ConnectError`]: a typed code plus a
//! human readable message, rendered as a JSON body with the HTTP status the
//! protocol assigns to the code.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::fmt;

/// Connect status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Canceled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Wire name, e.g. `invalid_argument`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    /// HTTP status used for a unary error response
    pub fn http_status(self) -> StatusCode {
        match self {
            // Client closed request; not a registered constant
            Self::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::InvalidArgument | Self::FailedPrecondition | Self::OutOfRange => {
                StatusCode::BAD_REQUEST
            }
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::Aborted => StatusCode::CONFLICT,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unknown | Self::Internal | Self::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a handler or raised by the protocol layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectError {
    code: Code,
    #[serde(skip_serializing_if = "String::is_empty")]
    message: String,
}

impl ConnectError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub const fn code(&self) -> Code {
        self.code
    }

    /// Render as a unary error response with a JSON body
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.code.http_status();
        let body = serde_json::to_vec(&self).unwrap_or_else(|_| {
            format!(r#"{{"code":"{}"}}"#, self.code.as_str()).into_bytes()
        });

        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|e| {
                crate::logger::log_error(&format!("Failed to build error response: {e}"));
                Response::new(Full::new(Bytes::new()))
            })
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for ConnectError {}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_code_status_mapping() {
        assert_eq!(Code::Canceled.http_status().as_u16(), 499);
        assert_eq!(Code::InvalidArgument.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(Code::DeadlineExceeded.http_status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(Code::ResourceExhausted.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Code::Unimplemented.http_status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(Code::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Code::DataLoss.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_code_wire_names_match_serde() {
        for code in [Code::InvalidArgument, Code::DeadlineExceeded, Code::DataLoss] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_display() {
        let err = ConnectError::new(Code::NotFound, "no such thing");
        assert_eq!(err.to_string(), "not_found: no such thing");
        assert_eq!(ConnectError::new(Code::Internal, "").to_string(), "internal");
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let resp = ConnectError::new(Code::InvalidArgument, "bad payload").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers()["content-type"], "application/json");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"code":"invalid_argument","message":"bad payload"}"#);
    }

    #[tokio::test]
    async fn test_into_response_omits_empty_message() {
        let resp = ConnectError::new(Code::Unavailable, "").into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"code":"unavailable"}"#);
    }
}
