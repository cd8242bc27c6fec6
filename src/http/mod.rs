//! HTTP protocol layer module
//!
//! Plain HTTP response builders, decoupled from the RPC codec.

pub mod response;

// Re-export commonly used builders
pub use response::{
    build_101_response, build_204_response, build_400_response, build_403_response,
    build_404_response, build_405_response, build_413_response, build_415_response,
};
