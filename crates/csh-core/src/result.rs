// SPDX-License-Identifier: MIT OR Apache-2.0
//! Task results, response entities, and the coarse status taxonomy.

use crate::JsonMap;
use csh_error::ErrorKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// StatusCategory
// ---------------------------------------------------------------------------

/// Coarse, protocol-independent outcome label.
///
/// Transports are responsible for mapping these to wire-level codes; the
/// [`StatusCategory::http_status`] helper provides the conventional HTTP
/// mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    /// The request completed normally.
    Success,
    /// The request was well-formed but invalid (missing field, unknown
    /// capability or action, failed validation).
    BadRequest,
    /// The caller is not authenticated for the operation.
    Unauthorized,
    /// The caller is authenticated but not allowed.
    Forbidden,
    /// The addressed resource does not exist.
    NotFound,
    /// An internal failure occurred while executing the request.
    ExecutionFailed,
    /// The service cannot currently serve the request (deadline exceeded,
    /// backend unavailable, shutting down).
    ServiceUnavailable,
}

impl StatusCategory {
    /// Total number of categories (used to size per-category counters).
    pub const COUNT: usize = 7;

    /// Stable string tag for this category.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::ExecutionFailed => "execution_failed",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Dense index for counter arrays; always `< Self::COUNT`.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Success => 0,
            Self::BadRequest => 1,
            Self::Unauthorized => 2,
            Self::Forbidden => 3,
            Self::NotFound => 4,
            Self::ExecutionFailed => 5,
            Self::ServiceUnavailable => 6,
        }
    }

    /// All categories, in index order.
    #[must_use]
    pub fn all() -> &'static [StatusCategory] {
        &[
            Self::Success,
            Self::BadRequest,
            Self::Unauthorized,
            Self::Forbidden,
            Self::NotFound,
            Self::ExecutionFailed,
            Self::ServiceUnavailable,
        ]
    }

    /// Conventional HTTP status code for this category.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Success => 200,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::ExecutionFailed => 500,
            Self::ServiceUnavailable => 503,
        }
    }

    /// Map a framework [`ErrorKind`] to the category a client should see.
    ///
    /// This is the single translation table used by the session when it
    /// converts raised errors into [`TaskResult::Failure`] values.
    #[must_use]
    pub fn from_error_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::BadRequest => Self::BadRequest,
            ErrorKind::Unauthorized => Self::Unauthorized,
            ErrorKind::Forbidden => Self::Forbidden,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Lifecycle => {
                Self::ServiceUnavailable
            }
            ErrorKind::Configuration | ErrorKind::Execution | ErrorKind::Internal => {
                Self::ExecutionFailed
            }
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Outcome of a single session execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskResult {
    /// The pipeline produced an output.
    Success {
        /// Output data entries, in insertion order.
        output: JsonMap,
        /// Output metadata bundle.
        metadata: JsonMap,
    },
    /// The pipeline (or its resolution) failed.
    Failure {
        /// Coarse outcome label for the transport.
        status: StatusCategory,
        /// Human-readable cause message.
        message: String,
        /// Failure metadata (timing marks, step name).
        metadata: JsonMap,
    },
}

impl TaskResult {
    /// Build a success result.
    #[must_use]
    pub fn success(output: JsonMap, metadata: JsonMap) -> Self {
        Self::Success { output, metadata }
    }

    /// Build a failure result with empty metadata.
    pub fn failure(status: StatusCategory, message: impl Into<String>) -> Self {
        Self::Failure {
            status,
            message: message.into(),
            metadata: JsonMap::new(),
        }
    }

    /// Returns `true` for [`TaskResult::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The status category of this result.
    #[must_use]
    pub fn status(&self) -> StatusCategory {
        match self {
            Self::Success { .. } => StatusCategory::Success,
            Self::Failure { status, .. } => *status,
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseEntity
// ---------------------------------------------------------------------------

/// Transport-facing response produced by a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseEntity {
    /// Successful response.
    Ok {
        /// Response data entries.
        data: JsonMap,
        /// Response metadata bundle.
        metadata: JsonMap,
    },
    /// Failed response.
    Error {
        /// Coarse outcome label; the transport maps this to a wire code.
        status: StatusCategory,
        /// Sanitised, user-visible message.
        message: String,
        /// Optional cause detail (omitted for internal failures).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ResponseEntity {
    /// Build a successful response.
    #[must_use]
    pub fn ok(data: JsonMap, metadata: JsonMap) -> Self {
        Self::Ok { data, metadata }
    }

    /// Build an error response without detail.
    pub fn error(status: StatusCategory, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: message.into(),
            detail: None,
        }
    }

    /// The status category of this response.
    #[must_use]
    pub fn status(&self) -> StatusCategory {
        match self {
            Self::Ok { .. } => StatusCategory::Success,
            Self::Error { status, .. } => *status,
        }
    }

    /// Convert a [`TaskResult`] into its response entity, preserving the
    /// status category unchanged.
    #[must_use]
    pub fn from_task_result(result: TaskResult) -> Self {
        match result {
            TaskResult::Success { output, metadata } => Self::Ok {
                data: output,
                metadata,
            },
            TaskResult::Failure {
                status,
                message,
                metadata,
            } => {
                let detail = metadata
                    .get("cause")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                Self::Error {
                    status,
                    message,
                    detail,
                }
            }
        }
    }
}
