use std::sync::Arc;

mod config;
mod connect;
mod handler;
mod http;
mod logger;
mod server;
mod service;

use handler::ServeMux;
use service::TestServer;

/// Configuration file looked up when no path is given (extension optional)
const DEFAULT_CONFIG_PATH: &str = "config";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if let Err(e) = run(&config_path) {
        logger::log_fatal(&format!("listen failed: {e}"));
        std::process::exit(1);
    }
}

fn run(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::Config::load_from(config_path)?;
    logger::init(&cfg)?;

    // 创建 Tokio 运行时，根据 workers 配置设置线程数
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(workers) = cfg.server.workers {
        runtime_builder.worker_threads(workers);
        logger::log_debug(&format!("[CONFIG] Using {workers} worker threads"));
    } else {
        logger::log_debug("[CONFIG] Using default worker threads (CPU cores)");
    }

    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cfg))
}

async fn async_main(cfg: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.get_socket_addr()?;

    let mux = ServeMux::new().handle(service::new_test_service_handler(TestServer::new(
        &cfg.rpc,
    )?));
    let state = Arc::new(config::AppState::new(cfg, mux)?);

    let listener = server::create_reusable_listener(addr)?;

    logger::log_server_start(&listener.local_addr()?, &state);

    server::run(listener, state).await
}
