//! Messages of the `v1` package
//!
//! Field numbers and JSON names follow the schema shared with the web client.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct TestRequest {
    #[prost(string, tag = "1")]
    #[serde(
        default,
        deserialize_with = "crate::connect::null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub request: String,
}

#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
pub struct TestResponse {
    #[prost(string, tag = "1")]
    #[serde(
        default,
        deserialize_with = "crate::connect::null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub response: String,
}
