//! Payload codecs for the inbound and outbound call boundary.
//!
//! JSON is the default; `MsgPack` (via `rmp-serde`) is selected by content type.

use serde::Serialize;

use crate::types::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

/// Errors from encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid MsgPack payload: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("failed to encode MsgPack payload: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
}

/// Wire codec selected per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadCodec {
    #[default]
    Json,
    MsgPack,
}

impl PayloadCodec {
    /// Picks the codec for a `content-type` header value. Parameters such as
    /// `; charset=utf-8` are ignored; anything unrecognised falls back to JSON.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return Self::Json;
        };
        let mime = ct.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case(MSGPACK_CONTENT_TYPE)
            || mime.eq_ignore_ascii_case("application/x-msgpack")
        {
            Self::MsgPack
        } else {
            Self::Json
        }
    }

    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => JSON_CONTENT_TYPE,
            Self::MsgPack => MSGPACK_CONTENT_TYPE,
        }
    }

    /// Decodes a request body. An empty body decodes to `Value::Null`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the body is not valid for this codec.
    pub fn decode(self, body: &[u8]) -> Result<Value, CodecError> {
        if body.is_empty() {
            return Ok(Value::Null);
        }
        match self {
            Self::Json => Ok(serde_json::from_slice(body)?),
            Self::MsgPack => Ok(rmp_serde::from_slice(body)?),
        }
    }

    /// Encodes a response body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the value cannot be represented in this codec.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }
}
