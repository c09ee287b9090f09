//! Core types shared by every component of the bridge
//!
//! This module defines:
//! - The error taxonomy (`BridgeError`) and its wire-level kind (`ErrorKind`)
//! - Opaque identifiers handed out by the Security Copilot service
//! - Evaluation records returned while polling
//! - The result envelope used for log-analytics queries

pub mod prompt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use thiserror::Error;

pub use prompt::{Prompt, PromptKind};

/// Error types for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No evaluation data retrieved after {attempts} polling attempts")]
    NoEvaluationData { attempts: u32 },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Auth(_) => ErrorKind::Auth,
            BridgeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BridgeError::Parse(_) => ErrorKind::Parse,
            BridgeError::Transport { .. } => ErrorKind::Transport,
            BridgeError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            BridgeError::NoEvaluationData { .. } => ErrorKind::NoEvaluationData,
        }
    }

    /// HTTP status attached to a transport failure, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            BridgeError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        BridgeError::Transport {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Stable, machine-readable error classification sent to MCP callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    InvalidArgument,
    Parse,
    Transport,
    MalformedResponse,
    NoEvaluationData,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::MalformedResponse => write!(f, "malformed_response"),
            ErrorKind::NoEvaluationData => write!(f, "no_evaluation_data"),
        }
    }
}

/// Serializable view of a `BridgeError`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorReport {
    /// Build a report whose message is prefixed with the operation that failed
    pub fn with_context(context: &str, err: &BridgeError) -> Self {
        ErrorReport {
            kind: err.kind(),
            message: format!("{}: {}", context, err),
            status: err.status(),
        }
    }
}

impl From<&BridgeError> for ErrorReport {
    fn from(err: &BridgeError) -> Self {
        ErrorReport {
            kind: err.kind(),
            message: err.to_string(),
            status: err.status(),
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

opaque_id!(
    /// Server-side conversation context
    SessionId
);
opaque_id!(
    /// Prompt accepted within a session; only meaningful with its `SessionId`
    PromptId
);
opaque_id!(
    /// Evaluation job; only meaningful with its session and prompt
    EvaluationId
);

/// State string the copilot service reports for a finished evaluation
pub const COMPLETED_STATE: &str = "Completed";

/// Evaluation record as returned by the copilot service
///
/// The record is kept verbatim so callers see every field the service sent;
/// only `state` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationRecord(JsonValue);

impl EvaluationRecord {
    pub fn new(value: JsonValue) -> Self {
        EvaluationRecord(value)
    }

    pub fn state(&self) -> Option<&str> {
        self.0.get("state").and_then(|s| s.as_str())
    }

    pub fn is_completed(&self) -> bool {
        self.state() == Some(COMPLETED_STATE)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }
}

/// One flattened query row: column name to cell value, in column order
pub type QueryRecord = Map<String, JsonValue>;

/// Uniform success/error wrapper for query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultEnvelope {
    Success {
        result: Vec<QueryRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_error: Option<String>,
    },
    Error {
        error: ErrorReport,
    },
}

impl ResultEnvelope {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success { .. })
    }

    pub fn records(&self) -> &[QueryRecord] {
        match self {
            ResultEnvelope::Success { result, .. } => result,
            ResultEnvelope::Error { .. } => &[],
        }
    }
}

impl From<BridgeError> for ResultEnvelope {
    fn from(err: BridgeError) -> Self {
        ResultEnvelope::Error {
            error: ErrorReport::from(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kind_wire_names() {
        let err = BridgeError::NoEvaluationData { attempts: 3 };
        assert_eq!(err.kind(), ErrorKind::NoEvaluationData);
        assert_eq!(
            serde_json::to_value(err.kind()).unwrap(),
            json!("no_evaluation_data")
        );
        assert_eq!(err.kind().to_string(), "no_evaluation_data");
    }

    #[test]
    fn test_error_report_keeps_status() {
        let err = BridgeError::transport(Some(409), "HTTP 409 Conflict: duplicate");
        let report = ErrorReport::with_context("Error uploading skillset", &err);
        assert_eq!(report.kind, ErrorKind::Transport);
        assert_eq!(report.status, Some(409));
        assert!(report.message.starts_with("Error uploading skillset: "));
    }

    #[test]
    fn test_evaluation_record_state() {
        let record = EvaluationRecord::new(json!({"state": "Completed", "result": {"content": "ok"}}));
        assert!(record.is_completed());

        let running = EvaluationRecord::new(json!({"state": "Running"}));
        assert!(!running.is_completed());
        assert_eq!(running.state(), Some("Running"));

        let lowercase = EvaluationRecord::new(json!({"state": "completed"}));
        assert!(!lowercase.is_completed());

        assert_eq!(EvaluationRecord::new(json!({})).state(), None);
    }

    #[test]
    fn test_envelope_serialization() {
        let mut row = QueryRecord::new();
        row.insert("DataType".to_string(), json!("SigninLogs"));
        let envelope = ResultEnvelope::Success {
            result: vec![row],
            partial_error: None,
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"status": "success", "result": [{"DataType": "SigninLogs"}]})
        );

        let failed: ResultEnvelope = BridgeError::transport(Some(400), "bad query").into();
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "transport");
        assert_eq!(value["error"]["status"], 400);
        assert!(failed.records().is_empty());
    }
}
