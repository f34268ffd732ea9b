// src/console/protocol.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SessionError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message,
                data: None,
            }),
        }
    }

    /// Error response carrying the session failure kind and its UI message.
    pub fn session_error(id: Value, err: &SessionError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: error_codes::for_session_error(err),
                message: err.to_string(),
                data: Some(json!({
                    "transient": err.is_transient(),
                    "status": err.status_message(),
                })),
            }),
        }
    }
}

// Standard JSON-RPC error codes, plus the server range used for session failures
pub mod error_codes {
    use crate::error::SessionError;

    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const NOT_READY: i32 = -32001;
    pub const BUSY: i32 = -32002;
    pub const FORBIDDEN: i32 = -32003;
    pub const REJECTED: i32 = -32004;
    pub const NETWORK: i32 = -32005;
    pub const READ_FAILED: i32 = -32006;

    pub fn for_session_error(err: &SessionError) -> i32 {
        match err {
            SessionError::NotReady | SessionError::WalletUnavailable(_) => NOT_READY,
            SessionError::Busy(_) => BUSY,
            SessionError::Forbidden | SessionError::NotAuthorized | SessionError::BelowZero => {
                FORBIDDEN
            }
            SessionError::UserRejected | SessionError::WriteRejected(_) => REJECTED,
            SessionError::NetworkMismatch { .. }
            | SessionError::SwitchFailed(_)
            | SessionError::UnknownChain(_)
            | SessionError::NetworkChanged => NETWORK,
            SessionError::ReadError(_) | SessionError::NoProviderAvailable => READ_FAILED,
            SessionError::DecodeError(_) => INTERNAL_ERROR,
        }
    }
}
