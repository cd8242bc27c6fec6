//! Typed request and response envelopes
//!
//! Handlers see the decoded message together with the HTTP headers of the
//! call, and may attach headers to their response.

use hyper::HeaderMap;

/// A decoded unary request
#[derive(Debug, Clone)]
pub struct RpcRequest<T> {
    headers: HeaderMap,
    message: T,
}

impl<T> RpcRequest<T> {
    pub const fn new(headers: HeaderMap, message: T) -> Self {
        Self { headers, message }
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_message(self) -> T {
        self.message
    }
}

/// A unary response before encoding
#[derive(Debug, Clone)]
pub struct RpcResponse<T> {
    headers: HeaderMap,
    message: T,
}

impl<T> RpcResponse<T> {
    pub fn new(message: T) -> Self {
        Self {
            headers: HeaderMap::new(),
            message,
        }
    }

    #[cfg(test)]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers sent alongside the encoded message
    #[cfg(test)]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[cfg(test)]
    pub const fn message(&self) -> &T {
        &self.message
    }

    pub fn into_parts(self) -> (HeaderMap, T) {
        (self.headers, self.message)
    }
}
