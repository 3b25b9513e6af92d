// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, resolution, and validation for Cheshire.
//!
//! The operator describes a deployment in a rooted set of YAML documents:
//! one main document (default `cheshire.yaml`, overridable through the
//! `CHESHIRE_CONFIG` environment variable) plus, per capability, an actions
//! document and a pipelines document resolved from the same root.  Loading
//! parses everything, resolves the cross-document references, and validates
//! in a single pass that accumulates every problem before reporting.
//!
//! The frozen [`Spec`] behind a [`ConfigurationManager`] is the only
//! artifact released to the rest of the system; reads hand out deep clones.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Loader and single-pass validation.
pub mod load;
/// Config source abstraction (filesystem root or embedded tree).
pub mod source;
/// Declarative spec types.
pub mod spec;

pub use load::{document_name, load, load_document, validate, CONFIG_ENV, DEFAULT_DOCUMENT};
pub use source::ConfigSource;
pub use spec::{
    ActionDef, ActionsSpec, CapabilitySpec, EngineSpec, ExposureSpec, PipelineSpec, PoolSpec,
    SourceSpec, Spec, SpecMetadata, StepDef, StepsDef, TransportSpec,
};

use csh_error::CshError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested document was not found under the configuration root.
    #[error("config document not found: {path}")]
    NotFound {
        /// Path that was requested, relative to the root.
        path: String,
    },

    /// The requested path escapes the configuration root.
    #[error("path escapes configuration root: {path}")]
    PathEscape {
        /// Offending path.
        path: String,
    },

    /// The document could not be read.
    #[error("failed to read {path}: {reason}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The document could not be parsed.
    #[error("failed to parse {path}: {reason}")]
    Parse {
        /// Path that was being parsed.
        path: String,
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems, all reported).
    #[error("config validation failed: {}", reasons.join("; "))]
    Validation {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

impl From<ConfigError> for CshError {
    fn from(err: ConfigError) -> Self {
        CshError::configuration(err.to_string()).with_source(err)
    }
}

// ---------------------------------------------------------------------------
// ConfigurationManager
// ---------------------------------------------------------------------------

/// Holds the frozen [`Spec`] for the lifetime of the process.
///
/// The spec is immutable after construction.  [`ConfigurationManager::spec`]
/// returns a deep clone, so a consumer mutating its copy cannot affect
/// subsequent reads.
#[derive(Debug)]
pub struct ConfigurationManager {
    spec: Spec,
}

impl ConfigurationManager {
    /// Freeze a validated spec.
    #[must_use]
    pub fn new(spec: Spec) -> Self {
        Self { spec }
    }

    /// Load from a config source and freeze the result.
    ///
    /// # Errors
    ///
    /// Propagates any [`ConfigError`] from [`load`].
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self::new(load(source)?))
    }

    /// Deep clone of the frozen spec.
    #[must_use]
    pub fn spec(&self) -> Spec {
        self.spec.clone()
    }

    /// Borrow the frozen spec (read-only).
    #[must_use]
    pub fn spec_ref(&self) -> &Spec {
        &self.spec
    }
}
