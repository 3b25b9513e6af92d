// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical input/output carriers and typed field access.
//!
//! A pipeline declares which canonical *shape* it consumes and which it
//! produces; the session constructs a [`CanonicalInput`] of the declared
//! input shape and the executor step transforms it into a
//! [`CanonicalOutput`] of the declared output shape.  Both carriers are
//! value types: the `with_*` combinators return a new value and leave the
//! original untouched.

use crate::JsonMap;
use csh_error::CshError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// ShapeKind
// ---------------------------------------------------------------------------

/// Closed set of canonical data shapes a pipeline can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    /// A single keyed record.
    Record,
    /// An ordered collection of records under a `rows` entry.
    RecordSet,
    /// A free-form nested document.
    Document,
    /// No data entries (side-effect-only actions).
    Empty,
}

impl ShapeKind {
    /// Stable identifier used in pipeline definitions.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::RecordSet => "record-set",
            Self::Document => "document",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShapeKind {
    type Err = CshError;

    /// Parse a shape identifier, case-insensitively; `_` and `-` are
    /// interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "record" => Ok(Self::Record),
            "record-set" | "recordset" => Ok(Self::RecordSet),
            "document" => Ok(Self::Document),
            "empty" => Ok(Self::Empty),
            other => Err(CshError::configuration(format!(
                "unknown canonical shape '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldError
// ---------------------------------------------------------------------------

/// Typed-access failure on a data or metadata map.
///
/// Missing and ill-typed fields are distinct variants so callers can react
/// differently (both ultimately surface as *bad-request*).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The key is absent.
    #[error("missing required field '{key}'")]
    Missing {
        /// Key that was looked up.
        key: String,
    },
    /// The key is present but holds a value of the wrong type.
    #[error("field '{key}' has wrong type: expected {expected}, found {actual}")]
    WrongType {
        /// Key that was looked up.
        key: String,
        /// Expected JSON type name.
        expected: &'static str,
        /// Actual JSON type name.
        actual: &'static str,
    },
}

impl From<FieldError> for CshError {
    fn from(err: FieldError) -> Self {
        let key = match &err {
            FieldError::Missing { key } | FieldError::WrongType { key, .. } => key.clone(),
        };
        CshError::bad_request(err.to_string()).with_context("field", key)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// EntryAccess
// ---------------------------------------------------------------------------

/// Fail-fast typed accessors for [`JsonMap`]s.
pub trait EntryAccess {
    /// The raw value under `key`, or [`FieldError::Missing`].
    fn require(&self, key: &str) -> Result<&serde_json::Value, FieldError>;

    /// The string under `key`; wrong-type values are rejected rather than
    /// coerced.
    fn require_str(&self, key: &str) -> Result<&str, FieldError>;

    /// The integer under `key`.
    fn require_i64(&self, key: &str) -> Result<i64, FieldError>;

    /// The object under `key`.
    fn require_object(&self, key: &str) -> Result<&serde_json::Map<String, serde_json::Value>, FieldError>;
}

impl EntryAccess for JsonMap {
    fn require(&self, key: &str) -> Result<&serde_json::Value, FieldError> {
        self.get(key).ok_or_else(|| FieldError::Missing {
            key: key.to_string(),
        })
    }

    fn require_str(&self, key: &str) -> Result<&str, FieldError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| FieldError::WrongType {
            key: key.to_string(),
            expected: "string",
            actual: json_type_name(value),
        })
    }

    fn require_i64(&self, key: &str) -> Result<i64, FieldError> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| FieldError::WrongType {
            key: key.to_string(),
            expected: "number",
            actual: json_type_name(value),
        })
    }

    fn require_object(
        &self,
        key: &str,
    ) -> Result<&serde_json::Map<String, serde_json::Value>, FieldError> {
        let value = self.require(key)?;
        value.as_object().ok_or_else(|| FieldError::WrongType {
            key: key.to_string(),
            expected: "object",
            actual: json_type_name(value),
        })
    }
}

// ---------------------------------------------------------------------------
// CanonicalInput
// ---------------------------------------------------------------------------

/// Framework-internal input carrier handed to a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalInput {
    shape: ShapeKind,
    data: JsonMap,
    metadata: JsonMap,
}

impl CanonicalInput {
    /// Create an empty input of the given shape.
    #[must_use]
    pub fn new(shape: ShapeKind) -> Self {
        Self {
            shape,
            data: JsonMap::new(),
            metadata: JsonMap::new(),
        }
    }

    /// Create an input from owned parts.  Taking ownership is the snapshot:
    /// the producer cannot mutate what it no longer holds.
    #[must_use]
    pub fn from_parts(shape: ShapeKind, data: JsonMap, metadata: JsonMap) -> Self {
        Self {
            shape,
            data,
            metadata,
        }
    }

    /// Declared shape of this input.
    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        self.shape
    }

    /// Data entries, in insertion order.
    #[must_use]
    pub fn data(&self) -> &JsonMap {
        &self.data
    }

    /// Metadata bundle.
    #[must_use]
    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    /// Functional copy with one data entry added or replaced.
    #[must_use]
    pub fn with_entry(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.data.insert(key.into(), value);
        next
    }

    /// Functional copy with one metadata entry added or replaced.
    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    /// Functional copy with an entire metadata bundle merged in; colliding
    /// keys take the incoming value.
    #[must_use]
    pub fn merge_metadata(&self, bundle: JsonMap) -> Self {
        let mut next = self.clone();
        next.metadata.extend(bundle);
        next
    }

    /// Iterate data entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ---------------------------------------------------------------------------
// CanonicalOutput
// ---------------------------------------------------------------------------

/// Framework-internal output carrier produced by a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalOutput {
    shape: ShapeKind,
    data: JsonMap,
    metadata: JsonMap,
}

impl CanonicalOutput {
    /// Create an empty output of the given shape.
    #[must_use]
    pub fn new(shape: ShapeKind) -> Self {
        Self {
            shape,
            data: JsonMap::new(),
            metadata: JsonMap::new(),
        }
    }

    /// Create an output from owned parts.
    #[must_use]
    pub fn from_parts(shape: ShapeKind, data: JsonMap, metadata: JsonMap) -> Self {
        Self {
            shape,
            data,
            metadata,
        }
    }

    /// Declared shape of this output.
    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        self.shape
    }

    /// Data entries, in insertion order.
    #[must_use]
    pub fn data(&self) -> &JsonMap {
        &self.data
    }

    /// Metadata bundle.
    #[must_use]
    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    /// Consume the output, yielding `(data, metadata)`.
    #[must_use]
    pub fn into_parts(self) -> (JsonMap, JsonMap) {
        (self.data, self.metadata)
    }

    /// Functional copy with one data entry added or replaced.
    #[must_use]
    pub fn with_entry(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.data.insert(key.into(), value);
        next
    }

    /// Functional copy with one metadata entry added or replaced.
    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    /// Iterate data entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }
}
