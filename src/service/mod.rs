//! RPC services exposed by the server

mod test_server;
pub mod v1;
pub mod v1connect;

pub use test_server::TestServer;
pub use v1connect::new_test_service_handler;

#[cfg(test)]
mod tests {
    use super::v1::{TestRequest, TestResponse};
    use super::*;
    use crate::config::{AppState, Config};
    use crate::connect::RpcRequest;
    use crate::handler::{handle_request, ServeMux};
    use crate::service::v1connect::{TestServiceHandler, TEST_SERVICE_TEST_PROCEDURE};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::{HeaderMap, Method, Request, Response, StatusCode};
    use std::net::SocketAddr;
    use std::sync::Arc;

    const WEB_ORIGIN: &str = "http://localhost:5173";

    fn test_state() -> Arc<AppState> {
        let mut cfg = Config::load_from("does-not-exist/connect-echo").unwrap();
        cfg.logging.access_log = false;
        cfg.cors.debug = false;
        let server = TestServer::new(&cfg.rpc).unwrap();
        let mux = ServeMux::new().handle(new_test_service_handler(server));
        Arc::new(AppState::new(cfg, mux).unwrap())
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn json_call(text: &str) -> Request<Full<Bytes>> {
        let body = serde_json::to_vec(&serde_json::json!({ "request": text })).unwrap();
        Request::builder()
            .method(Method::POST)
            .uri(TEST_SERVICE_TEST_PROCEDURE)
            .header("content-type", "application/json")
            .header("connect-protocol-version", "1")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    async fn echoed(resp: Response<Full<Bytes>>) -> String {
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let msg: TestResponse = serde_json::from_slice(&bytes).unwrap();
        msg.response
    }

    fn samples() -> Vec<String> {
        vec![
            String::new(),
            "hello".to_string(),
            "line\nbreak\ttab\r\u{0}nul\u{1b}[0m".to_string(),
            "héllo wörld ✓ 🚀".to_string(),
            "\"quoted\" {json} \\ backslash".to_string(),
            "x".repeat(10_000),
        ]
    }

    #[tokio::test]
    async fn test_handler_echoes_verbatim() {
        let server = TestServer::new(&crate::config::RpcConfig {
            diagnostic_header: "Some-Header".to_string(),
        })
        .unwrap();
        for s in samples() {
            let req = RpcRequest::new(HeaderMap::new(), TestRequest { request: s.clone() });
            let resp = server.test(req).await.unwrap();
            assert_eq!(resp.message().response, s);
            assert!(resp.headers().is_empty());
        }
    }

    #[test]
    fn test_invalid_diagnostic_header_rejected() {
        let cfg = crate::config::RpcConfig {
            diagnostic_header: "not a header".to_string(),
        };
        assert!(TestServer::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_json_echo_over_http() {
        let state = test_state();
        for s in samples() {
            let resp = handle_request(json_call(&s), Arc::clone(&state), peer())
                .await
                .unwrap();
            assert_eq!(echoed(resp).await, s);
        }
    }

    #[tokio::test]
    async fn test_empty_request_encodes_as_empty_object() {
        let state = test_state();
        let resp = handle_request(json_call(""), state, peer()).await.unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"{}");
    }

    #[tokio::test]
    async fn test_null_request_field_echoes_empty() {
        let state = test_state();
        let req = Request::builder()
            .method(Method::POST)
            .uri(TEST_SERVICE_TEST_PROCEDURE)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(br#"{"request":null}"#)))
            .unwrap();
        let resp = handle_request(req, state, peer()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"{}");
    }

    #[tokio::test]
    async fn test_proto_echo_over_http() {
        let state = test_state();
        for s in samples() {
            let body = prost::Message::encode_to_vec(&TestRequest { request: s.clone() });
            let req = Request::builder()
                .method(Method::POST)
                .uri(TEST_SERVICE_TEST_PROCEDURE)
                .header("content-type", "application/proto")
                .header("some-header", "diagnostic")
                .body(Full::new(Bytes::from(body)))
                .unwrap();
            let resp = handle_request(req, Arc::clone(&state), peer()).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(resp.headers()["content-type"], "application/proto");
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let msg = <TestResponse as prost::Message>::decode(&bytes[..]).unwrap();
            assert_eq!(msg.response, s);
        }
    }

    #[tokio::test]
    async fn test_unregistered_path_not_found() {
        let state = test_state();
        let mut req = json_call("x");
        *req.uri_mut() = "/v1.TestService/Other".parse().unwrap();
        let resp = handle_request(req, Arc::clone(&state), peer()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let mut req = json_call("x");
        *req.uri_mut() = "/v2.TestService/Test".parse().unwrap();
        let resp = handle_request(req, state, peer()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_browser_call_from_allowed_origin() {
        let state = test_state();

        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri(TEST_SERVICE_TEST_PROCEDURE)
            .header("origin", WEB_ORIGIN)
            .header("access-control-request-method", "POST")
            .header(
                "access-control-request-headers",
                "connect-protocol-version,content-type",
            )
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = handle_request(preflight, Arc::clone(&state), peer())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(resp.headers()["access-control-allow-origin"], WEB_ORIGIN);
        assert_eq!(resp.headers()["access-control-allow-credentials"], "true");

        let mut req = json_call("from the browser");
        req.headers_mut()
            .insert("origin", WEB_ORIGIN.parse().unwrap());
        let resp = handle_request(req, state, peer()).await.unwrap();
        assert_eq!(resp.headers()["access-control-allow-origin"], WEB_ORIGIN);
        assert_eq!(echoed(resp).await, "from the browser");
    }

    #[tokio::test]
    async fn test_browser_call_from_disallowed_origin() {
        let state = test_state();
        let mut req = json_call("sneaky");
        req.headers_mut()
            .insert("origin", "http://attacker.example".parse().unwrap());
        let resp = handle_request(req, state, peer()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_do_not_cross_talk() {
        let state = test_state();
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let input = format!("call-{i}");
                    let resp = handle_request(json_call(&input), state, peer())
                        .await
                        .unwrap();
                    (input, echoed(resp).await)
                })
            })
            .collect();

        for task in tasks {
            let (input, output) = task.await.unwrap();
            assert_eq!(input, output);
        }
    }
}
