//! Message codecs
//!
//! Unary Connect calls carry either binary protobuf (`application/proto`)
//! or proto3 JSON (`application/json`). The codec is chosen from the request
//! `Content-Type` and reused for the response.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::{Code, ConnectError};

/// Bounds a message type must satisfy to travel over either codec
pub trait RpcMessage: prost::Message + Default + Serialize + DeserializeOwned + 'static {}

impl<T> RpcMessage for T where T: prost::Message + Default + Serialize + DeserializeOwned + 'static {}

/// Field deserializer mapping JSON `null` to the field's default value
///
/// proto3 JSON treats `null` on a singular field like an absent field. Use
/// together with `#[serde(default)]`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Codec selected for a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json,
    Proto,
}

/// Value for `Accept-Post` when a request carries an unsupported media type
pub const SUPPORTED_CONTENT_TYPES: &str = "application/json, application/proto";

impl Codec {
    /// Pick the codec for a `Content-Type` value, ignoring parameters
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            "application/json" => Some(Self::Json),
            "application/proto" => Some(Self::Proto),
            _ => None,
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Proto => "application/proto",
        }
    }

    pub fn decode<M: RpcMessage>(self, payload: &[u8]) -> Result<M, ConnectError> {
        match self {
            Self::Json => {
                if payload.is_empty() {
                    return Err(ConnectError::new(
                        Code::InvalidArgument,
                        "unmarshal into message: zero-length payload is not a valid JSON object",
                    ));
                }
                serde_json::from_slice(payload).map_err(|e| {
                    ConnectError::new(Code::InvalidArgument, format!("unmarshal into message: {e}"))
                })
            }
            Self::Proto => M::decode(payload).map_err(|e| {
                ConnectError::new(Code::InvalidArgument, format!("unmarshal into message: {e}"))
            }),
        }
    }

    pub fn encode<M: RpcMessage>(self, message: &M) -> Result<Vec<u8>, ConnectError> {
        match self {
            Self::Json => serde_json::to_vec(message).map_err(|e| {
                ConnectError::new(Code::Internal, format!("marshal message: {e}"))
            }),
            Self::Proto => Ok(message.encode_to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Greeting {
        #[prost(string, tag = "1")]
        #[serde(
            default,
            deserialize_with = "null_as_default",
            skip_serializing_if = "String::is_empty"
        )]
        text: String,
    }

    #[test]
    fn test_from_content_type() {
        assert_eq!(Codec::from_content_type("application/json"), Some(Codec::Json));
        assert_eq!(
            Codec::from_content_type("Application/JSON; charset=utf-8"),
            Some(Codec::Json)
        );
        assert_eq!(Codec::from_content_type("application/proto"), Some(Codec::Proto));
        assert_eq!(Codec::from_content_type("application/grpc"), None);
        assert_eq!(Codec::from_content_type("text/plain"), None);
        assert_eq!(Codec::from_content_type(""), None);
    }

    #[test]
    fn test_json_omits_default_fields() {
        let bytes = Codec::Json.encode(&Greeting::default()).unwrap();
        assert_eq!(bytes, b"{}");
        let decoded: Greeting = Codec::Json.decode(b"{}").unwrap();
        assert_eq!(decoded, Greeting::default());
    }

    #[test]
    fn test_json_ignores_unknown_fields() {
        let decoded: Greeting = Codec::Json.decode(br#"{"text":"hi","extra":1}"#).unwrap();
        assert_eq!(decoded.text, "hi");
    }

    #[test]
    fn test_json_null_field_is_default() {
        let decoded: Greeting = Codec::Json.decode(br#"{"text":null}"#).unwrap();
        assert_eq!(decoded, Greeting::default());
    }

    #[test]
    fn test_json_empty_payload_is_invalid() {
        let err = Codec::Json.decode::<Greeting>(b"").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_json_malformed_payload_is_invalid() {
        let err = Codec::Json.decode::<Greeting>(b"{\"text\":").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        let err = Codec::Json.decode::<Greeting>(br#"{"text":42}"#).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_proto_empty_payload_is_default() {
        let decoded: Greeting = Codec::Proto.decode(b"").unwrap();
        assert_eq!(decoded, Greeting::default());
    }

    #[test]
    fn test_proto_wire_bytes() {
        let msg = Greeting {
            text: "hey".to_string(),
        };
        // field 1, wire type 2, length 3
        assert_eq!(Codec::Proto.encode(&msg).unwrap(), b"\x0a\x03hey");
    }

    #[test]
    fn test_proto_truncated_payload_is_invalid() {
        let err = Codec::Proto.decode::<Greeting>(b"\x0a\x05he").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
