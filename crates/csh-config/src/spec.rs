// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declarative spec types.
//!
//! These mirror the on-disk document shape one-to-one.  The only fields
//! that are not read from the main document are [`CapabilitySpec::actions`]
//! and [`CapabilitySpec::pipelines`], which the loader resolves from the
//! capability's referenced documents.

use csh_core::JsonMap;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Root of the declarative configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Spec {
    /// Deployment metadata block.
    #[serde(default)]
    pub metadata: SpecMetadata,
    /// Data sources by name.
    #[serde(default)]
    pub sources: IndexMap<String, SourceSpec>,
    /// Query engines by name.
    #[serde(default)]
    pub engines: IndexMap<String, EngineSpec>,
    /// Capabilities by name.
    #[serde(default)]
    pub capabilities: IndexMap<String, CapabilitySpec>,
    /// Server transports by name.
    #[serde(default)]
    pub transports: IndexMap<String, TransportSpec>,
    /// Exposures by name.
    #[serde(default)]
    pub exposures: IndexMap<String, ExposureSpec>,
}

/// Deployment metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpecMetadata {
    /// Deployment name.
    #[serde(default)]
    pub name: String,
    /// Deployment version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Connection-pool tuning knobs for a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoolSpec {
    /// Minimum number of idle connections to keep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_idle: Option<u32>,
    /// Maximum pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
    /// How long an acquire may wait, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
}

/// Declaration of a single data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceSpec {
    /// Identifier of the provider factory that materializes this source.
    #[serde(default)]
    pub factory: String,
    /// Source type tag (e.g. `relational`, `memory`).
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Connection options handed to the factory adapter.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub connection: JsonMap,
    /// Pool tuning, when the provider pools connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSpec>,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub extras: JsonMap,
}

/// Declaration of a single query engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineSpec {
    /// Identifier of the engine factory.
    #[serde(default)]
    pub factory: String,
    /// Names of the sources this engine evaluates queries against.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Engine-specific extras.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub extras: JsonMap,
}

/// Declaration of a server transport.
///
/// A default (empty) record is what a capability falls back to when its
/// transport reference does not resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransportSpec {
    /// Identifier of the server factory.
    #[serde(default)]
    pub factory: String,
    /// Transport options (bind address, ...).
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub options: JsonMap,
}

/// Declaration of how a capability is exposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExposureSpec {
    /// Binding kind, parsed case-insensitively into a transport kind
    /// (`http_json`, `jsonrpc`, `stdio`, `streaming`).
    #[serde(default)]
    pub binding: String,
    /// Exposure version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Mount path or channel name, depending on the binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Declaration of a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilitySpec {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Domain grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Name of the exposure this capability is published under.
    #[serde(default)]
    pub exposure: String,
    /// Name of the transport this capability is served on.
    #[serde(default)]
    pub transport: String,
    /// Names of the sources available to this capability's pipelines.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Name of the engine bound to this capability, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Actions document, relative to the configuration root.
    #[serde(default, rename = "actions-specification-file")]
    pub actions_file: String,
    /// Pipelines document, relative to the configuration root.
    #[serde(default, rename = "pipelines-definition-file")]
    pub pipelines_file: String,
    /// Resolved actions (filled by the loader, not read from this doc).
    #[serde(skip)]
    pub actions: ActionsSpec,
    /// Resolved pipelines (filled by the loader, not read from this doc).
    #[serde(skip)]
    pub pipelines: IndexMap<String, PipelineSpec>,
}

/// Actions document: action name to definition.
pub type ActionsSpec = IndexMap<String, ActionDef>;

/// Definition of a single action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionDef {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the pipeline (in the capability's pipelines document) that
    /// realizes this action.
    #[serde(default)]
    pub pipeline: String,
}

/// Definition of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineSpec {
    /// Canonical input shape identifier.
    #[serde(default)]
    pub input: String,
    /// Canonical output shape identifier.
    #[serde(default)]
    pub output: String,
    /// The step chain.
    #[serde(default)]
    pub steps: StepsDef,
}

/// The three step slots of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepsDef {
    /// Pre-processor steps, run in order.  May be empty.
    #[serde(default)]
    pub pre: Vec<StepDef>,
    /// The single executor step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<StepDef>,
    /// Post-processor steps, run in order.  May be empty.
    #[serde(default)]
    pub post: Vec<StepDef>,
}

/// Declaration of a single pipeline step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepDef {
    /// Step instance name (unique within its pipeline).
    #[serde(default)]
    pub name: String,
    /// Identifier of the step implementation to instantiate.
    #[serde(default)]
    pub implementation: String,
    /// Optional template string handed to the step constructor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Step-specific parameters.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub params: JsonMap,
}
