//! Request multiplexer
//!
//! Maps path prefixes to registered services. Registration happens once at
//! startup; dispatch is read-only and shared by every connection.

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};

use crate::connect::ServiceHandler;
use crate::http;
use crate::logger;

#[derive(Default)]
pub struct ServeMux {
    services: Vec<ServiceHandler>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `service` under its path prefix, replacing a service of the same name
    #[must_use]
    pub fn handle(mut self, service: ServiceHandler) -> Self {
        if let Some(pos) = self.services.iter().position(|s| s.name() == service.name()) {
            logger::log_warning(&format!(
                "Service {} registered twice, keeping the last registration",
                service.name()
            ));
            self.services.remove(pos);
        }
        self.services.push(service);
        self
    }

    /// Every routable procedure path
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .services
            .iter()
            .flat_map(|s| s.procedure_paths().into_iter().map(str::to_string))
            .collect();
        routes.sort_unstable();
        routes
    }

    /// Longest registered prefix matching `path`
    fn find(&self, path: &str) -> Option<&ServiceHandler> {
        self.services
            .iter()
            .map(|s| (s.path_prefix(), s))
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, s)| s)
    }

    pub async fn dispatch<B>(&self, req: Request<B>, max_body_size: usize) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self.find(req.uri().path()) {
            Some(service) => service.serve(req, max_body_size).await,
            None => http::build_404_response(),
        }
    }
}
