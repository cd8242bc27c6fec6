// Configuration module entry point
// Loads layered configuration and holds the shared application state

mod state;
mod types;

use std::net::SocketAddr;

// Re-export public types
pub use state::AppState;
pub use types::{Config, CorsConfig, PerformanceConfig, RpcConfig};

impl Config {
    /// Load configuration from specified file path (without extension)
    ///
    /// A missing file is not an error: defaults and `SERVER__*` environment
    /// variables still apply (e.g. `SERVER__SERVER__PORT=6000`).
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("SERVER").separator("__"))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 5000)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("logging.access_log_format", "combined")?
            .set_default("performance.header_read_timeout", 30)?
            .set_default("http.max_body_size", 4_194_304)? // 4MB
            .set_default("cors.allowed_origins", vec!["http://localhost:5173"])?
            .set_default("cors.allowed_methods", vec!["GET", "POST", "HEAD"])?
            .set_default(
                "cors.allowed_headers",
                vec!["Connect-Protocol-Version", "Content-Type"],
            )?
            .set_default("cors.exposed_headers", Vec::<String>::new())?
            .set_default("cors.allow_credentials", true)?
            .set_default("cors.max_age", 0)?
            .set_default("cors.debug", true)?
            .set_default("rpc.diagnostic_header", "Some-Header")?
            .build()?;

        settings.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }

    /// Body size cap used when reading RPC payloads
    pub fn max_body_size(&self) -> usize {
        usize::try_from(self.http.max_body_size).unwrap_or(usize::MAX)
    }
}
