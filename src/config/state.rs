// Application state module
// Immutable state shared by every connection task

use std::sync::atomic::AtomicUsize;

use super::types::Config;
use crate::handler::{Cors, ServeMux};

/// Application state
pub struct AppState {
    pub config: Config,
    pub mux: ServeMux,
    pub cors: Cors,
    pub active_connections: AtomicUsize,
}

impl AppState {
    /// Wrap the registered services in the configured CORS filter
    pub fn new(config: Config, mux: ServeMux) -> Result<Self, String> {
        let cors = Cors::new(&config.cors)?;
        Ok(Self {
            config,
            mux,
            cors,
            active_connections: AtomicUsize::new(0),
        })
    }
}
