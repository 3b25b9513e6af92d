// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in step implementations.
//!
//! - [`IdentityPre`] — hands the input through unchanged
//! - [`ValidateRequiredPre`] — rejects inputs missing declared keys
//! - [`EchoExecutor`] — copies input data to output (shape-preserving)
//! - [`EngineQueryExecutor`] — evaluates a logical query on the bound engine
//! - [`AnnotatePost`] — stamps a metadata entry on the output

use crate::{Executor, PipelineContext, PostProcessor, PreProcessor, StepConfig};
use csh_core::{CanonicalInput, CanonicalOutput, JsonMap, ShapeKind};
use csh_engine::LogicalQuery;
use csh_error::{CshError, Result};

/// Implementation id of [`IdentityPre`].
pub const IDENTITY_PRE: &str = "identity-pre";
/// Implementation id of [`ValidateRequiredPre`].
pub const VALIDATE_REQUIRED: &str = "validate-required";
/// Implementation id of [`EchoExecutor`].
pub const ECHO_EXECUTOR: &str = "echo";
/// Implementation id of [`EngineQueryExecutor`].
pub const ENGINE_QUERY_EXECUTOR: &str = "engine-query";
/// Implementation id of [`AnnotatePost`].
pub const ANNOTATE_POST: &str = "annotate";

// ---------------------------------------------------------------------------
// IdentityPre
// ---------------------------------------------------------------------------

/// Pre-processor that returns its input unchanged.
pub struct IdentityPre {
    name: String,
}

impl IdentityPre {
    /// Construct from a step config (only the name is read).
    #[must_use]
    pub fn new(config: &StepConfig) -> Self {
        Self {
            name: if config.name.is_empty() {
                IDENTITY_PRE.to_string()
            } else {
                config.name.clone()
            },
        }
    }
}

#[async_trait::async_trait]
impl PreProcessor for IdentityPre {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, input: CanonicalInput, _ctx: &PipelineContext) -> Result<CanonicalInput> {
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// ValidateRequiredPre
// ---------------------------------------------------------------------------

/// Pre-processor that rejects inputs missing any of the declared keys.
///
/// Declared via `params.required`, a list of data entry names.
#[derive(Debug)]
pub struct ValidateRequiredPre {
    name: String,
    required: Vec<String>,
}

impl ValidateRequiredPre {
    /// Construct from a step config.
    ///
    /// # Errors
    ///
    /// A *configuration* error when `params.required` is missing or not a
    /// list of strings.
    pub fn new(config: &StepConfig) -> Result<Self> {
        let required = config
            .params
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect::<Vec<_>>()
            })
            .ok_or_else(|| {
                CshError::configuration(format!(
                    "step '{}': params.required must be a list of field names",
                    config.name
                ))
            })?;
        Ok(Self {
            name: config.name.clone(),
            required,
        })
    }
}

#[async_trait::async_trait]
impl PreProcessor for ValidateRequiredPre {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, input: CanonicalInput, _ctx: &PipelineContext) -> Result<CanonicalInput> {
        for key in &self.required {
            if !input.data().contains_key(key) {
                return Err(CshError::bad_request(format!(
                    "missing required field '{key}'"
                )));
            }
        }
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// EchoExecutor
// ---------------------------------------------------------------------------

/// Executor that copies input data and metadata to the output.
///
/// Shape-preserving: the output carries the input's shape, which makes the
/// echo pipeline the identity law fixture (`input.data == output.data`).
pub struct EchoExecutor {
    name: String,
}

impl EchoExecutor {
    /// Construct from a step config (only the name is read).
    #[must_use]
    pub fn new(config: &StepConfig) -> Self {
        Self {
            name: if config.name.is_empty() {
                ECHO_EXECUTOR.to_string()
            } else {
                config.name.clone()
            },
        }
    }
}

#[async_trait::async_trait]
impl Executor for EchoExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, input: CanonicalInput, _ctx: &PipelineContext) -> Result<CanonicalOutput> {
        Ok(CanonicalOutput::from_parts(
            input.shape(),
            input.data().clone(),
            input.metadata().clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// EngineQueryExecutor
// ---------------------------------------------------------------------------

/// Executor that evaluates a logical query on the context's engine.
///
/// The statement comes from the step template when present, otherwise from
/// the input's `query` entry.  Parameters come from the input's `params`
/// object entry, when present.  Produces a record-set output with a `rows`
/// entry.
pub struct EngineQueryExecutor {
    name: String,
    template: Option<String>,
}

impl EngineQueryExecutor {
    /// Construct from a step config.
    #[must_use]
    pub fn new(config: &StepConfig) -> Self {
        Self {
            name: if config.name.is_empty() {
                ENGINE_QUERY_EXECUTOR.to_string()
            } else {
                config.name.clone()
            },
            template: config.template.clone(),
        }
    }

    fn statement(&self, input: &CanonicalInput) -> Result<String> {
        if let Some(template) = &self.template {
            return Ok(template.clone());
        }
        input
            .data()
            .get("query")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                CshError::bad_request(
                    "engine-query executor needs a template or a 'query' input entry",
                )
            })
    }
}

#[async_trait::async_trait]
impl Executor for EngineQueryExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, input: CanonicalInput, ctx: &PipelineContext) -> Result<CanonicalOutput> {
        let engine = ctx.engine().ok_or_else(|| {
            CshError::execution("engine-query executor requires a bound engine")
        })?;

        let statement = self.statement(&input)?;
        let params: JsonMap = input
            .data()
            .get("params")
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let query = LogicalQuery {
            statement,
            params,
            target: input
                .data()
                .get("target")
                .and_then(|v| v.as_str())
                .map(String::from),
        };

        if !engine.validate(&query) {
            return Err(CshError::bad_request(format!(
                "engine '{}' rejected the query",
                engine.name()
            )));
        }

        let result = engine.execute(query, &ctx.engine_context()).await?;
        let mut data = JsonMap::new();
        data.insert("rows".into(), serde_json::Value::from(result.rows.len() as u64));
        data.insert(
            "records".into(),
            serde_json::to_value(&result.rows)
                .map_err(|err| CshError::execution("engine rows are not serializable").with_source(err))?,
        );
        Ok(CanonicalOutput::from_parts(
            ShapeKind::RecordSet,
            data,
            result.metadata,
        ))
    }
}

// ---------------------------------------------------------------------------
// AnnotatePost
// ---------------------------------------------------------------------------

/// Post-processor that stamps one metadata entry on the output.
///
/// The template is `key=value`; params entries are merged in as well.
pub struct AnnotatePost {
    name: String,
    entry: Option<(String, String)>,
    params: JsonMap,
}

impl AnnotatePost {
    /// Construct from a step config.
    #[must_use]
    pub fn new(config: &StepConfig) -> Self {
        let entry = config.template.as_deref().and_then(|template| {
            template
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        });
        Self {
            name: if config.name.is_empty() {
                ANNOTATE_POST.to_string()
            } else {
                config.name.clone()
            },
            entry,
            params: config.params.clone(),
        }
    }
}

#[async_trait::async_trait]
impl PostProcessor for AnnotatePost {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        output: CanonicalOutput,
        _ctx: &PipelineContext,
    ) -> Result<CanonicalOutput> {
        let mut next = output;
        if let Some((key, value)) = &self.entry {
            next = next.with_metadata(key.clone(), serde_json::Value::from(value.clone()));
        }
        for (key, value) in &self.params {
            next = next.with_metadata(key.clone(), value.clone());
        }
        Ok(next)
    }
}
