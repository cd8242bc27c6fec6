// Server module entry
// Binds the listener, accepts connections and serves HTTP/1.1 + h2c
// (prior knowledge or `Upgrade: h2c`)

pub mod connection;
pub mod h2c;
pub mod listener;
pub mod signal;

// Rust 不允许 loop 作为模块名（关键字），改用 server_loop
#[path = "loop.rs"]
pub mod server_loop;

// Re-export commonly used items
pub use listener::create_reusable_listener;
pub use server_loop::run;
