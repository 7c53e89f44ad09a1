//! Wire model for the framed JSON-RPC stream.
//!
//! One frame is one JSON object on one line. A frame is classified by key
//! presence, never by a schema:
//!
//! | Keys present        | Classified as          |
//! |---------------------|------------------------|
//! | `method` + `id`     | [`Frame::Request`]     |
//! | `method`, no `id`   | [`Frame::Notification`]|
//! | `id`, no `method`   | [`Frame::Response`]    |
//! | neither             | [`Frame::Invalid`]     |
//!
//! Payloads (`params`, `result`, `error.data`) are opaque
//! [`serde_json::Value`]s; this module never interprets them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ── Reserved JSON-RPC error codes ─────────────────────────────────────────────

/// A frame was not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// A frame was valid JSON but not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler is registered for the requested method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The handler rejected the request parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// The handler failed while serving the request.
pub const INTERNAL_ERROR: i64 = -32603;

/// Protocol version stamped on every outbound frame.
const JSONRPC_VERSION: &str = "2.0";

// ── Request ids ───────────────────────────────────────────────────────────────

/// A request id: an integer or a string.
///
/// Locally allocated ids are always integers (monotonically increasing,
/// starting at zero). Peers may use either shape; inbound ids are echoed
/// back verbatim on the matching response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    Text(String),
}

impl RequestId {
    /// The pending-table key for this id, if it is one of ours.
    ///
    /// Locally issued ids are non-negative integers; anything else cannot
    /// match a pending entry.
    #[must_use]
    pub fn as_table_key(&self) -> Option<u64> {
        match self {
            Self::Number(n) => u64::try_from(*n).ok(),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

// ── Structured errors ─────────────────────────────────────────────────────────

/// JSON-RPC error object carried by error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Reserved protocol code or application-defined code.
    pub code: i64,
    /// Human-readable summary.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Build an error object from raw parts.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// [`PARSE_ERROR`] — a frame was not valid JSON.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error", None)
    }

    /// [`INVALID_REQUEST`] — a frame was not a valid request object.
    #[must_use]
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid request", None)
    }

    /// [`METHOD_NOT_FOUND`] — no handler registered for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            "Method not found",
            Some(json!({ "method": method })),
        )
    }

    /// [`INVALID_PARAMS`] — the handler rejected the parameters.
    #[must_use]
    pub fn invalid_params(data: Option<Value>) -> Self {
        Self::new(INVALID_PARAMS, "Invalid params", data)
    }

    /// [`INTERNAL_ERROR`] — the handler failed while serving the request.
    #[must_use]
    pub fn internal_error(data: Option<Value>) -> Self {
        Self::new(INTERNAL_ERROR, "Internal error", data)
    }

    /// [`INTERNAL_ERROR`] carrying a failure description under `details`.
    #[must_use]
    pub fn internal_error_message(detail: impl Into<String>) -> Self {
        Self::internal_error(Some(json!({ "details": detail.into() })))
    }
}

// ── Frame classification ──────────────────────────────────────────────────────

/// One decoded inbound frame.
#[derive(Debug)]
pub enum Frame {
    /// Peer-issued method call expecting exactly one response.
    Request {
        /// Peer's correlation id, echoed back on the response.
        id: RequestId,
        /// Role-scoped method name.
        method: String,
        /// Opaque parameter payload.
        params: Option<Value>,
    },
    /// One-way method call; never answered.
    Notification {
        /// Role-scoped method name.
        method: String,
        /// Opaque parameter payload.
        params: Option<Value>,
    },
    /// Answer to a locally issued request.
    Response {
        /// Correlation id of the local request this answers.
        id: RequestId,
        /// Result payload or structured error.
        outcome: std::result::Result<Value, ErrorObject>,
    },
    /// A JSON object carrying neither a method nor a usable id; ignored.
    Invalid,
}

impl Frame {
    /// Classify a parsed JSON value into a frame.
    ///
    /// A response with a `result` key resolves to that value; with an
    /// `error` key, to the decoded error object; with neither, to `null`.
    /// An `error` value that does not decode as an error object falls back
    /// to an internal-error placeholder so the pending entry still resolves.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::Invalid;
        };

        let id = match map.remove("id") {
            None => None,
            Some(raw) => match serde_json::from_value::<RequestId>(raw) {
                Ok(id) => Some(id),
                // An `id` of an unsupported shape cannot be correlated.
                Err(_) => return Self::Invalid,
            },
        };
        let method = match map.remove("method") {
            Some(Value::String(m)) => Some(m),
            Some(_) => return Self::Invalid,
            None => None,
        };
        let params = map.remove("params").filter(|p| !p.is_null());

        match (method, id) {
            (Some(method), Some(id)) => Self::Request { id, method, params },
            (Some(method), None) => Self::Notification { method, params },
            (None, Some(id)) => {
                let outcome = if let Some(result) = map.remove("result") {
                    Ok(result)
                } else if let Some(raw) = map.remove("error") {
                    match serde_json::from_value::<ErrorObject>(raw) {
                        Ok(err) => Err(err),
                        Err(_) => Err(ErrorObject::internal_error_message(
                            "malformed error object in response",
                        )),
                    }
                } else {
                    // Neither key present: the response still resolves, to null.
                    Ok(Value::Null)
                };
                Self::Response { id, outcome }
            }
            (None, None) => Self::Invalid,
        }
    }
}

// ── Outbound frame constructors ───────────────────────────────────────────────

/// Build an outbound request frame.
#[must_use]
pub fn request_frame(id: u64, method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        }),
        None => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "method": method,
        }),
    }
}

/// Build an outbound notification frame (no id, never answered).
#[must_use]
pub fn notification_frame(method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        }),
        None => json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        }),
    }
}

/// Build an outbound response frame echoing the originating request id.
///
/// Exactly one of `result`/`error` appears, depending on `outcome`.
#[must_use]
pub fn response_frame(id: &RequestId, outcome: std::result::Result<Value, ErrorObject>) -> Value {
    match outcome {
        Ok(result) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "result": result,
        }),
        Err(err) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": id,
            "error": err,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
