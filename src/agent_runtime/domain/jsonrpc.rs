//! JSON-RPC 2.0 envelope handling.
//!
//! The runtime only validates the envelope and correlates ids; `params`,
//! `result`, and `error` payloads are forwarded opaquely.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Protocol version literal required in every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used for infrastructure failures reported to JSON-RPC callers.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Request identifier: a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// Numeric identifier.
    Number(serde_json::Number),
    /// String identifier.
    String(String),
}

impl JsonRpcId {
    /// Reads an identifier out of a raw JSON value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Some(Self::Number(number.clone())),
            Value::String(text) => Some(Self::String(text.clone())),
            _ => None,
        }
    }

    /// Returns a key that distinguishes `1` from `"1"`.
    #[must_use]
    pub fn correlation_key(&self) -> String {
        match self {
            Self::Number(number) => format!("n:{number}"),
            Self::String(text) => format!("s:{text}"),
        }
    }
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(formatter, "{number}"),
            Self::String(text) => write!(formatter, "\"{text}\""),
        }
    }
}

impl From<i64> for JsonRpcId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for JsonRpcId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A validated JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    jsonrpc: String,
    id: JsonRpcId,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with the protocol version filled in.
    #[must_use]
    pub fn new(id: impl Into<JsonRpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Validates a decoded JSON value as a request envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] naming the first missing or invalid field.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let Value::Object(object) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(EnvelopeError::Version);
        }

        let id = object
            .get("id")
            .and_then(JsonRpcId::from_value)
            .ok_or(EnvelopeError::Id)?;

        let method = object
            .get("method")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::Method)?
            .to_owned();

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method,
            params: object.get("params").cloned(),
        })
    }

    /// Parses and validates a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidJson`] for undecodable bodies and the
    /// field-specific variants otherwise.
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| EnvelopeError::InvalidJson(err.to_string()))?;
        Self::from_value(&value)
    }

    /// Returns the request identifier.
    #[must_use]
    pub const fn id(&self) -> &JsonRpcId {
        &self.id
    }

    /// Returns the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the opaque parameters.
    #[must_use]
    pub const fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }
}

/// Reason a body is not a valid request envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Body is not JSON.
    #[error("request body must be valid JSON: {0}")]
    InvalidJson(String),
    /// Body is JSON but not an object.
    #[error("request body must be a JSON object")]
    NotAnObject,
    /// `jsonrpc` is missing or not the literal version string.
    #[error("jsonrpc version must be \"2.0\"")]
    Version,
    /// `id` is missing or of the wrong type.
    #[error("id must be a string or number")]
    Id,
    /// `method` is missing or not a string.
    #[error("method must be a string")]
    Method,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    jsonrpc: String,
    id: Option<JsonRpcId>,
    error: JsonRpcErrorObject,
}

impl JsonRpcErrorResponse {
    /// Builds an internal-error response for `id`.
    #[must_use]
    pub fn internal(id: Option<JsonRpcId>, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            error: JsonRpcErrorObject {
                code: INTERNAL_ERROR_CODE,
                message: message.into(),
                data: None,
            },
        }
    }

    /// Returns the correlated id.
    #[must_use]
    pub const fn id(&self) -> Option<&JsonRpcId> {
        self.id.as_ref()
    }

    /// Returns the error object.
    #[must_use]
    pub const fn error(&self) -> &JsonRpcErrorObject {
        &self.error
    }
}

/// Returns the id of a response line, if it has a usable one.
#[must_use]
pub fn response_id(response: &Value) -> Option<JsonRpcId> {
    response
        .as_object()
        .and_then(|object: &Map<String, Value>| object.get("id"))
        .and_then(JsonRpcId::from_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))]
    #[case(json!({"jsonrpc": "2.0", "id": "abc", "method": "tools/call", "params": {"name": "x"}}))]
    fn valid_envelopes_are_accepted(#[case] body: Value) {
        let request = JsonRpcRequest::from_value(&body).expect("envelope should be valid");
        assert_eq!(Some(request.method()), body.get("method").and_then(Value::as_str));
    }

    #[rstest]
    #[case(json!([1, 2]), "request body must be a JSON object")]
    #[case(json!({"jsonrpc": "1.0", "id": 1, "method": "m"}), "jsonrpc version must be \"2.0\"")]
    #[case(json!({"id": 1, "method": "m"}), "jsonrpc version must be \"2.0\"")]
    #[case(json!({"jsonrpc": "2.0", "method": "m"}), "id must be a string or number")]
    #[case(json!({"jsonrpc": "2.0", "id": {"x": 1}, "method": "m"}), "id must be a string or number")]
    #[case(json!({"jsonrpc": "2.0", "id": 1}), "method must be a string")]
    #[case(json!({"jsonrpc": "2.0", "id": 1, "method": 7}), "method must be a string")]
    fn invalid_envelopes_name_the_field(#[case] body: Value, #[case] message: &str) {
        let error = JsonRpcRequest::from_value(&body).expect_err("envelope should be invalid");
        assert_eq!(error.to_string(), message);
    }

    #[test]
    fn non_json_body_is_rejected() {
        let error = JsonRpcRequest::parse(b"not json").expect_err("body is not JSON");
        assert!(matches!(error, EnvelopeError::InvalidJson(_)));
    }

    #[test]
    fn correlation_key_distinguishes_string_and_number_ids() {
        assert_ne!(
            JsonRpcId::from(1).correlation_key(),
            JsonRpcId::from("1").correlation_key()
        );
    }

    #[test]
    fn internal_error_serializes_with_standard_code() {
        let response = JsonRpcErrorResponse::internal(Some(JsonRpcId::from(7)), "server x not found");
        let value = serde_json::to_value(&response).expect("serializable");

        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "error": {"code": -32603, "message": "server x not found"}
            })
        );
    }
}
