// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy for the Cheshire framework.
//!
//! Every framework error is a [`CshError`] carrying an [`ErrorKind`] (a
//! closed, machine-readable classification), a human-readable message,
//! arbitrary key-value context, and an optional source chain.  Boundaries
//! wrap low-level failures with context (which capability, which action,
//! which step) while preserving the original cause.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Closed classification of every error the framework can surface.
///
/// Each variant serialises to a `snake_case` string that is stable across
/// releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Raised during load / resolve / validate of the declarative spec.
    /// Accumulated where possible; fatal at startup.
    Configuration,
    /// Invalid state transition, double-start, execute-before-start.
    Lifecycle,
    /// A source or engine cannot open or has been closed.
    Connection,
    /// Missing or ill-typed field on a task or envelope; unknown
    /// capability or action.
    BadRequest,
    /// Raised by user step code: the caller is not authenticated for the
    /// operation.
    Unauthorized,
    /// Raised by user step code: the caller is authenticated but not
    /// allowed.
    Forbidden,
    /// Deadline exceeded during pipeline execution.
    Timeout,
    /// Any other failure in user step code or downstream collaborators.
    Execution,
    /// A violated internal invariant (e.g. an adapter produced a config of
    /// the wrong declared kind).
    Internal,
}

impl ErrorKind {
    /// Stable string tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Lifecycle => "lifecycle",
            Self::Connection => "connection",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Timeout => "timeout",
            Self::Execution => "execution",
            Self::Internal => "internal",
        }
    }

    /// Returns `true` for kinds that indicate a broken invariant rather
    /// than a routine request failure.
    #[must_use]
    pub fn is_catastrophic(&self) -> bool {
        matches!(self, Self::Internal)
    }

    /// All kinds, in declaration order.
    #[must_use]
    pub fn all() -> &'static [ErrorKind] {
        &[
            Self::Configuration,
            Self::Lifecycle,
            Self::Connection,
            Self::BadRequest,
            Self::Unauthorized,
            Self::Forbidden,
            Self::Timeout,
            Self::Execution,
            Self::Internal,
        ]
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CshError
// ---------------------------------------------------------------------------

/// A classified framework error.
///
/// Construct with the per-kind helpers ([`CshError::configuration`],
/// [`CshError::bad_request`], ...) and enrich fluently:
///
/// ```
/// use csh_error::CshError;
///
/// let err = CshError::bad_request("unknown capability")
///     .with_context("capability", "blog");
/// assert!(err.kind().is_bad_request());
/// ```
#[derive(Debug)]
pub struct CshError {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, serde_json::Value>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CshError {
    /// Create an error with an explicit kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// A *configuration* error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// A *lifecycle* error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lifecycle, message)
    }

    /// A *connection* error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// A *bad-request* error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// An *unauthorized* error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// A *forbidden* error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// A *timeout* error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// An *execution* error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    /// An *internal* (violated invariant) error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a key-value context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The error's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message (without context or cause).
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The attached context entries.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    /// Re-classify this error, keeping message, context, and cause.
    #[must_use]
    pub fn into_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for CshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if !self.context.is_empty() {
            let entries: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " ({})", entries.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for CshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience predicates on [`ErrorKind`].
impl ErrorKind {
    /// Is this a *bad-request* kind?
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest)
    }

    /// Is this a *configuration* kind?
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration)
    }

    /// Is this a *lifecycle* kind?
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle)
    }

    /// Is this a *timeout* kind?
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Framework-wide result alias.
pub type Result<T, E = CshError> = std::result::Result<T, E>;
