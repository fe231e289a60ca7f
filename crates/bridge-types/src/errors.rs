//! # Error Types
//!
//! The error taxonomy shared by all contexts, and the numeric+string
//! [`ApiError`] pair that travels inside response `error` fields.

use crate::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Numeric error codes exposed to the page.
pub mod codes {
    pub const INVALID_REQUEST: i32 = -1;
    pub const INTERNAL_ERROR: i32 = -2;
    pub const REFUSED: i32 = -3;
    pub const ACCOUNT_CHANGE: i32 = -4;
    pub const TIMEOUT: i32 = -5;
}

/// Error payload carried in the `error` field of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i32,
    pub info: String,
}

impl ApiError {
    pub fn new(code: i32, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
        }
    }

    pub fn invalid_request(info: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, info)
    }

    pub fn internal(info: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, info)
    }

    pub fn refused(info: impl Into<String>) -> Self {
        Self::new(codes::REFUSED, info)
    }

    pub fn timeout(info: impl Into<String>) -> Self {
        Self::new(codes::TIMEOUT, info)
    }

    /// Wire form of the error.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "code": self.code, "info": self.info })
    }

    /// Parse an opaque error payload, if it has the `{code, info}` shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Gate denial or scope destroyed before completion.
    Refused,
    /// No response within the deadline.
    Timeout,
    /// Transport or storage failure.
    TransportError,
    /// Message did not belong to this protocol.
    MalformedEnvelope,
    /// Operation invoked before its async setup completed.
    NotInitialized,
    /// The privileged handler answered with an application error.
    Rejected,
}

/// Why a message was not recognised as a protocol envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedEnvelope {
    #[error("payload is not an envelope: {0}")]
    Undecodable(String),

    #[error("target is missing or belongs to another protocol")]
    ForeignTarget,

    #[error("sender is missing")]
    MissingSender,

    #[error("ambiguous envelope: {0}")]
    Ambiguous(&'static str),

    #[error("envelope is neither request, response nor broadcast")]
    Unclassifiable,
}

/// Errors surfaced to callers of the bridge.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    #[error("refused: {0}")]
    Refused(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] MalformedEnvelope),

    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Two live requests sharing one id. This is a caller bug.
    #[error("correlation id {0} is already pending")]
    DuplicateCorrelation(CorrelationId),

    #[error("rejected by handler ({}): {}", .0.code, .0.info)]
    Rejected(ApiError),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Refused(_) => ErrorKind::Refused,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            BridgeError::Transport(_) | BridgeError::DuplicateCorrelation(_) => {
                ErrorKind::TransportError
            }
            BridgeError::Malformed(_) => ErrorKind::MalformedEnvelope,
            BridgeError::NotInitialized(_) => ErrorKind::NotInitialized,
            BridgeError::Rejected(_) => ErrorKind::Rejected,
        }
    }

    /// Interpret the `error` field of a response.
    ///
    /// A `Refused` code becomes [`BridgeError::Refused`] so that gate denials
    /// and cancelled conversations are distinguishable by kind alone.
    pub fn from_error_payload(payload: &Value) -> Self {
        match ApiError::from_value(payload) {
            Some(api) if api.code == codes::REFUSED => BridgeError::Refused(api.info),
            Some(api) => BridgeError::Rejected(api),
            None => BridgeError::Rejected(ApiError::internal(payload.to_string())),
        }
    }

    /// Numeric+string pair for the page.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            BridgeError::Refused(info) => ApiError::refused(info.clone()),
            BridgeError::Timeout(_) => ApiError::timeout(self.to_string()),
            BridgeError::Malformed(_) => ApiError::invalid_request(self.to_string()),
            BridgeError::Rejected(api) => api.clone(),
            BridgeError::Transport(_)
            | BridgeError::NotInitialized(_)
            | BridgeError::DuplicateCorrelation(_) => ApiError::internal(self.to_string()),
        }
    }
}
