//! Connect protocol layer
//!
//! Implements the unary subset of the Connect RPC protocol over HTTP:
//! codecs, the error model, typed envelopes and per-service dispatch.

mod codec;
mod error;
mod message;
mod service;
mod unary;

pub use codec::null_as_default;
pub use error::ConnectError;
pub use message::{RpcRequest, RpcResponse};
pub use service::ServiceHandler;
pub use unary::UnaryHandler;
