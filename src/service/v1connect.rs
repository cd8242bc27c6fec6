//! Connect bindings for `v1.TestService`

use std::future::Future;
use std::sync::Arc;

use super::v1::{TestRequest, TestResponse};
use crate::connect::{ConnectError, RpcRequest, RpcResponse, ServiceHandler, UnaryHandler};

/// Fully-qualified name of the service
pub const TEST_SERVICE_NAME: &str = "v1.TestService";

/// Route of the `Test` procedure
pub const TEST_SERVICE_TEST_PROCEDURE: &str = "/v1.TestService/Test";

/// Server-side implementation of `v1.TestService`
pub trait TestServiceHandler: Send + Sync + 'static {
    fn test(
        &self,
        req: RpcRequest<TestRequest>,
    ) -> impl Future<Output = Result<RpcResponse<TestResponse>, ConnectError>> + Send;
}

/// Build the routable service for `svc`, mounted under `/v1.TestService/`
pub fn new_test_service_handler<H: TestServiceHandler>(svc: H) -> ServiceHandler {
    let svc = Arc::new(svc);
    ServiceHandler::new(TEST_SERVICE_NAME).unary(
        TEST_SERVICE_TEST_PROCEDURE,
        UnaryHandler::new(move |req: RpcRequest<TestRequest>| {
            let svc = Arc::clone(&svc);
            async move { svc.test(req).await }
        }),
    )
}
