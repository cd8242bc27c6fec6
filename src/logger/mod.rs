//! Logger module
//!
//! Provides logging utilities for the RPC server including:
//! - Server lifecycle logging
//! - Access logging with multiple formats
//! - Level-filtered info, debug, warning and error lines
//! - File-based logging support

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::AppState;
use chrono::Local;
use std::net::SocketAddr;
use std::str::FromStr;

/// Severity of a log line, ordered from most to least severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
}

impl Level {
    const fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" | "trace" => Ok(Self::Debug),
            other => Err(format!("Unknown log level: '{other}'")),
        }
    }
}

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &crate::config::Config) -> std::io::Result<()> {
    let level = config
        .logging
        .level
        .parse::<Level>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    writer::init(
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
        level,
    )
}

fn enabled(level: Level) -> bool {
    writer::get().map_or(Level::Info, writer::LogWriter::level) >= level
}

fn line(level: Level, message: &str) -> String {
    format!(
        "{} [{}] {message}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        level.label()
    )
}

fn write(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    let line = line(level, message);
    match (writer::get(), level) {
        (Some(w), Level::Error | Level::Warn) => w.write_error(&line),
        (Some(w), _) => w.write_info(&line),
        (None, Level::Error | Level::Warn) => eprintln!("{line}"),
        (None, _) => println!("{line}"),
    }
}

pub fn log_info(message: &str) {
    write(Level::Info, message);
}

pub fn log_debug(message: &str) {
    write(Level::Debug, message);
}

pub fn log_warning(message: &str) {
    write(Level::Warn, message);
}

pub fn log_error(message: &str) {
    write(Level::Error, message);
}

/// Unrecoverable failure, written regardless of level
pub fn log_fatal(message: &str) {
    let line = line(Level::Error, &format!("[FATAL] {message}"));
    match writer::get() {
        Some(w) => w.write_error(&line),
        None => eprintln!("{line}"),
    }
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    let message = entry.format(format);
    match writer::get() {
        Some(w) => w.write_access(&message),
        None => println!("{message}"),
    }
}

pub fn log_server_start(addr: &SocketAddr, state: &AppState) {
    let config = &state.config;
    log_info("======================================");
    log_info("Connect RPC server started");
    log_info(&format!("Listening on: http://{addr} (HTTP/1.1 + h2c)"));
    for route in state.mux.routes() {
        log_info(&format!("  - POST http://{addr}{route}"));
    }
    log_info(&format!(
        "CORS origins: {}",
        config.cors.allowed_origins.join(", ")
    ));
    log_info(&format!("Log level: {}", config.logging.level));
    if let Some(workers) = config.server.workers {
        log_info(&format!("Worker threads: {workers}"));
    }
    if let Some(ref path) = config.logging.access_log_file {
        log_info(&format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        log_info(&format!("Error log: {path}"));
    }
    log_info("======================================");
}

pub fn log_connection_accepted(peer_addr: &SocketAddr) {
    log_debug(&format!("[Connection] Accepted from: {peer_addr}"));
}

pub fn log_connection_error(err: &impl std::fmt::Display) {
    log_warning(&format!("[Connection] Failed to serve connection: {err}"));
}

pub fn log_cors(message: &str) {
    log_info(&format!("[cors] {message}"));
}

pub fn log_shutdown(reason: &str) {
    log_info(&format!("[Shutdown] {reason}, no longer accepting connections"));
}
