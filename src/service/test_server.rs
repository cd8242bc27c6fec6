//! Echo implementation of `v1.TestService`

use hyper::header::{HeaderName, InvalidHeaderName};

use super::v1::{TestRequest, TestResponse};
use super::v1connect::TestServiceHandler;
use crate::config::RpcConfig;
use crate::connect::{ConnectError, RpcRequest, RpcResponse};
use crate::logger;

/// Stateless handler: replies with the request field unchanged
#[derive(Debug, Clone)]
pub struct TestServer {
    diagnostic_header: HeaderName,
}

impl TestServer {
    pub fn new(config: &RpcConfig) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            diagnostic_header: HeaderName::from_bytes(config.diagnostic_header.as_bytes())?,
        })
    }
}

impl TestServiceHandler for TestServer {
    async fn test(
        &self,
        req: RpcRequest<TestRequest>,
    ) -> Result<RpcResponse<TestResponse>, ConnectError> {
        let value = req
            .headers()
            .get(&self.diagnostic_header)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        logger::log_info(&format!("[rpc] {}: {value}", self.diagnostic_header));

        Ok(RpcResponse::new(TestResponse {
            response: req.into_message().request,
        }))
    }
}
