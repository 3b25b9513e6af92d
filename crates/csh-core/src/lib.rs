// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical data model for the Cheshire framework.
//!
//! Everything that crosses the transport boundary is expressed in the types
//! defined here: the [`RequestEnvelope`] a dispatcher receives, the
//! [`CanonicalInput`] / [`CanonicalOutput`] pair a pipeline consumes and
//! produces, and the closed [`TaskResult`] / [`ResponseEntity`] sum types a
//! session and dispatcher hand back.  All variant types are closed; consumers
//! are expected to match exhaustively.
//!
//! Maps carried inside envelopes are snapshotted on construction (the
//! constructors take ownership), so later producer-side mutation cannot leak
//! into consumers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Request context and security context types.
pub mod context;
/// Request envelope, protocol metadata, and payload.
pub mod envelope;
/// Canonical input/output carriers and typed field access.
pub mod io;
/// Well-known metadata keys shared between dispatcher and session.
pub mod meta;
/// Task results, response entities, and the coarse status taxonomy.
pub mod result;

pub use context::{RequestContext, SecurityContext};
pub use envelope::{EnvelopeBuilder, ProtocolMeta, RequestEnvelope, RequestPayload};
pub use io::{CanonicalInput, CanonicalOutput, EntryAccess, FieldError, ShapeKind};
pub use result::{ResponseEntity, StatusCategory, TaskResult};

/// Insertion-ordered string-keyed map of JSON values.
///
/// This is the uniform carrier for envelope payloads, canonical data, and
/// metadata bundles.  Iteration yields entries in insertion order.
pub type JsonMap = indexmap::IndexMap<String, serde_json::Value>;
