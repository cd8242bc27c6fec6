//! Service dispatch table
//!
//! A [`ServiceHandler`] owns the procedures of one fully-qualified service
//! and is mounted in the multiplexer under `/<service>/`.

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use std::collections::HashMap;
use std::sync::Arc;

use super::unary::{serve_unary, Procedure};
use crate::http;

pub struct ServiceHandler {
    name: String,
    procedures: HashMap<String, Arc<dyn Procedure>>,
}

impl ServiceHandler {
    /// Empty service, e.g. `ServiceHandler::new("v1.TestService")`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedures: HashMap::new(),
        }
    }

    /// Register `procedure` at its full path, e.g. `/v1.TestService/Test`
    #[must_use]
    pub fn unary(mut self, path: &str, procedure: impl Procedure + 'static) -> Self {
        self.procedures.insert(path.to_string(), Arc::new(procedure));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path prefix the service is mounted under
    pub fn path_prefix(&self) -> String {
        format!("/{}/", self.name)
    }

    /// Full procedure paths, sorted
    pub fn procedure_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Serve a request whose path falls under this service's prefix
    pub async fn serve<B>(&self, req: Request<B>, max_body_size: usize) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let Some(procedure) = self.procedures.get(parts.uri.path()).map(Arc::clone) else {
            crate::logger::log_debug(&format!(
                "[rpc] {} has no procedure {}",
                self.name,
                parts.uri.path()
            ));
            return http::build_404_response();
        };

        serve_unary(procedure.as_ref(), parts, body, max_body_size).await
    }
}
