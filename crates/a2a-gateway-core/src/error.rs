//! Error taxonomy shared by the router, task managers and state bridge.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC code for an unknown task (A2A `TaskNotFoundError`).
pub const TASK_NOT_FOUND: i64 = -32001;
/// JSON-RPC code for a task that can no longer be canceled.
pub const TASK_NOT_CANCELABLE: i64 = -32002;
/// JSON-RPC code used for gateway execution timeouts.
pub const EXECUTION_TIMEOUT: i64 = -32000;
/// Standard JSON-RPC codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Protocol operation an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "message/send")]
    SendMessage,
    #[serde(rename = "message/stream")]
    StreamMessage,
    #[serde(rename = "tasks/get")]
    GetTask,
    #[serde(rename = "tasks/cancel")]
    CancelTask,
    #[serde(rename = "tasks/pushNotificationConfig/set")]
    SetPushNotification,
    #[serde(rename = "tasks/pushNotificationConfig/get")]
    GetPushNotification,
    #[serde(rename = "tasks/resubscribe")]
    Resubscribe,
}

impl Operation {
    /// All operations, in protocol order.
    pub const ALL: [Self; 7] = [
        Self::SendMessage,
        Self::StreamMessage,
        Self::GetTask,
        Self::CancelTask,
        Self::SetPushNotification,
        Self::GetPushNotification,
        Self::Resubscribe,
    ];

    /// JSON-RPC method name.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::SendMessage => "message/send",
            Self::StreamMessage => "message/stream",
            Self::GetTask => "tasks/get",
            Self::CancelTask => "tasks/cancel",
            Self::SetPushNotification => "tasks/pushNotificationConfig/set",
            Self::GetPushNotification => "tasks/pushNotificationConfig/get",
            Self::Resubscribe => "tasks/resubscribe",
        }
    }

    /// Look up an operation by JSON-RPC method name.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.method() == method)
    }

    /// Whether the operation answers with an event stream.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::StreamMessage | Self::Resubscribe)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Stable error kind exposed to protocol clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Timeout,
    BackendFailure,
    StoreUnavailable,
    SerializationError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Timeout => "timeout",
            Self::BackendFailure => "backend_failure",
            Self::StoreUnavailable => "store_unavailable",
            Self::SerializationError => "serialization_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("{operation} timed out after {}s", after.as_secs_f64())]
    Timeout { operation: Operation, after: Duration },
    #[error("{operation} failed: {detail}")]
    BackendFailure {
        operation: Operation,
        code: Option<i64>,
        detail: String,
    },
    #[error("Store unavailable during {context}: {detail}")]
    StoreUnavailable { context: String, detail: String },
    #[error("Malformed payload during {context}: {detail}")]
    Serialization { context: String, detail: String },
}

impl GatewayError {
    /// Backend failure carrying the backend's own JSON-RPC code.
    #[must_use]
    pub fn backend(operation: Operation, code: i64, detail: impl Into<String>) -> Self {
        Self::BackendFailure {
            operation,
            code: Some(code),
            detail: detail.into(),
        }
    }

    /// Backend failure without a protocol code (transport errors, disconnects).
    #[must_use]
    pub fn backend_transport(operation: Operation, detail: impl fmt::Display) -> Self {
        Self::BackendFailure {
            operation,
            code: None,
            detail: detail.to_string(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BackendFailure { .. } => ErrorKind::BackendFailure,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::Serialization { .. } => ErrorKind::SerializationError,
        }
    }

    /// JSON-RPC error code used when this error is returned to a protocol client.
    #[must_use]
    pub const fn rpc_code(&self) -> i64 {
        match self {
            Self::NotFound(_) => TASK_NOT_FOUND,
            Self::BadRequest(_) => INVALID_PARAMS,
            Self::Timeout { .. } => EXECUTION_TIMEOUT,
            Self::BackendFailure { code: Some(code), .. } => *code,
            Self::BackendFailure { code: None, .. }
            | Self::StoreUnavailable { .. }
            | Self::Serialization { .. } => INTERNAL_ERROR,
        }
    }

    /// Message safe to hand to protocol clients.
    ///
    /// Backend details are passed through as reported; store failures only
    /// name the call, never the store's own response.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::BackendFailure { detail, .. } => detail.clone(),
            Self::StoreUnavailable { context, .. } => format!("store unavailable during {context}"),
            Self::Serialization { context, .. } => format!("malformed stored payload during {context}"),
            other => other.to_string(),
        }
    }
}
