//! Cross-origin access control
//!
//! Answers preflight requests itself and decorates actual responses for
//! allowed origins. Requests carrying an `Origin` outside the policy are
//! refused before they reach the multiplexer.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
    VARY,
};
use hyper::{HeaderMap, Method, Request, Response};
use std::future::Future;

use crate::config::CorsConfig;
use crate::http;
use crate::logger;

/// Compiled CORS policy
#[derive(Debug, Clone)]
pub struct Cors {
    /// Lowercased allowed origins
    allowed_origins: Vec<String>,
    allow_any_origin: bool,
    allowed_methods: Vec<Method>,
    /// Lowercased allowed request headers, always including `origin`
    allowed_headers: Vec<String>,
    allow_any_header: bool,
    exposed_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: u64,
    debug: bool,
}

impl Cors {
    pub fn new(config: &CorsConfig) -> Result<Self, String> {
        let allow_any_origin = config.allowed_origins.iter().any(|o| o == "*");
        let allowed_origins = config
            .allowed_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .map(|o| o.to_ascii_lowercase())
            .collect();

        let allowed_methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|e| format!("Invalid CORS method '{m}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let allow_any_header = config.allowed_headers.iter().any(|h| h == "*");
        let mut allowed_headers = vec!["origin".to_string()];
        for header in config.allowed_headers.iter().filter(|h| h.as_str() != "*") {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| format!("Invalid CORS header '{header}': {e}"))?;
            allowed_headers.push(name.as_str().to_string());
        }

        let exposed_headers = if config.exposed_headers.is_empty() {
            None
        } else {
            let joined = config.exposed_headers.join(", ");
            Some(
                HeaderValue::from_str(&joined)
                    .map_err(|e| format!("Invalid CORS exposed headers '{joined}': {e}"))?,
            )
        };

        Ok(Self {
            allowed_origins,
            allow_any_origin,
            allowed_methods,
            allowed_headers,
            allow_any_header,
            exposed_headers,
            allow_credentials: config.allow_credentials,
            max_age: config.max_age,
            debug: config.debug,
        })
    }

    /// Apply the policy around `next`
    pub async fn handle<B, F, Fut>(&self, req: Request<B>, next: F) -> Response<Full<Bytes>>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Response<Full<Bytes>>>,
    {
        if req.method() == Method::OPTIONS
            && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
        {
            return self.preflight(req.headers());
        }

        let Some(origin) = req.headers().get(ORIGIN).cloned() else {
            let mut resp = next(req).await;
            resp.headers_mut().append(VARY, HeaderValue::from_static("Origin"));
            return resp;
        };

        if !self.is_origin_allowed(&origin) {
            self.trace(&format!(
                "Actual request refused: origin '{}' not allowed",
                lossy(&origin)
            ));
            let mut resp = http::build_403_response();
            resp.headers_mut().append(VARY, HeaderValue::from_static("Origin"));
            return resp;
        }

        let method = req.method().clone();
        let mut resp = next(req).await;
        let headers = resp.headers_mut();
        headers.append(VARY, HeaderValue::from_static("Origin"));

        if !self.is_method_allowed(&method) {
            self.trace(&format!(
                "Actual request no headers added: method '{method}' not allowed"
            ));
            return resp;
        }

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if let Some(exposed) = &self.exposed_headers {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, exposed.clone());
        }
        self.trace(&format!("Actual response added headers: {headers:?}"));
        resp
    }

    fn preflight(&self, req_headers: &HeaderMap) -> Response<Full<Bytes>> {
        let mut resp = http::build_204_response();
        let headers = resp.headers_mut();
        headers.append(VARY, HeaderValue::from_static("Origin"));
        headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Method"));
        headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));

        let Some(origin) = req_headers.get(ORIGIN) else {
            self.trace("Preflight aborted: empty origin");
            return resp;
        };
        if !self.is_origin_allowed(origin) {
            self.trace(&format!(
                "Preflight aborted: origin '{}' not allowed",
                lossy(origin)
            ));
            return resp;
        }

        let requested_method = req_headers
            .get(ACCESS_CONTROL_REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .and_then(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).ok());
        let Some(requested_method) = requested_method.filter(|m| self.is_method_allowed(m)) else {
            self.trace("Preflight aborted: method not allowed");
            return resp;
        };

        let requested_headers = parse_header_list(req_headers);
        if let Some(refused) = requested_headers
            .iter()
            .find(|h| !self.is_header_allowed(h))
        {
            self.trace(&format!("Preflight aborted: header '{refused}' not allowed"));
            return resp;
        }

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if let Ok(value) = HeaderValue::from_str(requested_method.as_str()) {
            headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        if !requested_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&requested_headers.join(", ")) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
        }
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if self.max_age > 0 {
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age));
        }
        self.trace(&format!("Preflight response headers: {headers:?}"));
        resp
    }

    pub fn is_origin_allowed(&self, origin: &HeaderValue) -> bool {
        if self.allow_any_origin {
            return true;
        }
        origin.to_str().is_ok_and(|o| {
            let o = o.to_ascii_lowercase();
            self.allowed_origins.iter().any(|allowed| *allowed == o)
        })
    }

    fn is_method_allowed(&self, method: &Method) -> bool {
        // Preflights are always let through
        *method == Method::OPTIONS || self.allowed_methods.contains(method)
    }

    fn is_header_allowed(&self, header: &str) -> bool {
        self.allow_any_header || self.allowed_headers.iter().any(|h| h == header)
    }

    fn trace(&self, message: &str) {
        if self.debug {
            logger::log_cors(message);
        }
    }
}

/// Lowercased, trimmed names from every `Access-Control-Request-Headers` value
fn parse_header_list(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(ACCESS_CONTROL_REQUEST_HEADERS)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

fn lossy(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
