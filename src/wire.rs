//! JSON wire format for shortest-path requests and replies.
//!
//! Requests carry `ori`, `dest` and `client_uuid`. Replies carry `path` and
//! an optional `error`; a non-null `error` is decoded into
//! [`Reply::Failure`] so callers never inspect a nullable field.

use crate::identity::ClientId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CONTENT_TYPE: &str = "application/json";

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    #[serde(rename = "ori")]
    pub origin: String,
    #[serde(rename = "dest")]
    pub destination: String,
    pub client_uuid: Uuid,
}

/// Raw reply body as it appears on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ResponsePayload {
    #[serde(default)]
    path: Option<Vec<String>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Success { path: Vec<String> },
    /// The responder could not satisfy the request.
    Failure { reason: String },
}

impl Reply {
    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Failure { .. })
    }
}

pub fn encode_request(
    origin: &str,
    destination: &str,
    client: &ClientId,
) -> Result<Bytes, CodecError> {
    let payload = RequestPayload {
        origin: origin.to_string(),
        destination: destination.to_string(),
        client_uuid: *client.as_uuid(),
    };
    serde_json::to_vec(&payload)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

pub fn decode_request(data: &[u8]) -> Result<RequestPayload, CodecError> {
    serde_json::from_slice(data).map_err(CodecError::Decode)
}

pub fn decode_response(data: &[u8]) -> Result<Reply, CodecError> {
    let raw: ResponsePayload = serde_json::from_slice(data).map_err(CodecError::Decode)?;
    Ok(match raw.error {
        None | Some(serde_json::Value::Null) => Reply::Success {
            path: raw.path.unwrap_or_default(),
        },
        Some(serde_json::Value::String(reason)) => Reply::Failure { reason },
        Some(other) => Reply::Failure {
            reason: other.to_string(),
        },
    })
}

/// Encode a reply in the responder's wire shape.
pub fn encode_response(reply: &Reply) -> Result<Bytes, CodecError> {
    let raw = match reply {
        Reply::Success { path } => ResponsePayload {
            path: Some(path.clone()),
            error: None,
        },
        Reply::Failure { reason } => ResponsePayload {
            path: None,
            error: Some(serde_json::Value::String(reason.clone())),
        },
    };
    serde_json::to_vec(&raw)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}
