// SPDX-License-Identifier: MIT OR Apache-2.0
//! The frozen pre/exec/post processor.

use crate::{Executor, PipelineContext, PostProcessor, PreProcessor};
use csh_core::{meta, CanonicalInput, CanonicalOutput, ShapeKind};
use csh_error::{CshError, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A frozen pipeline bound to one action: zero or more pre-processors, one
/// executor, zero or more post-processors, plus the declared input and
/// output shapes.
pub struct PipelineProcessor {
    name: String,
    input_shape: ShapeKind,
    output_shape: ShapeKind,
    pre: Vec<Arc<dyn PreProcessor>>,
    exec: Arc<dyn Executor>,
    post: Vec<Arc<dyn PostProcessor>>,
}

impl PipelineProcessor {
    /// Assemble a processor.  The step lists are frozen from here on.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input_shape: ShapeKind,
        output_shape: ShapeKind,
        pre: Vec<Arc<dyn PreProcessor>>,
        exec: Arc<dyn Executor>,
        post: Vec<Arc<dyn PostProcessor>>,
    ) -> Self {
        Self {
            name: name.into(),
            input_shape,
            output_shape,
            pre,
            exec,
            post,
        }
    }

    /// Pipeline name (for logs and error context).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared input shape.
    #[must_use]
    pub fn input_shape(&self) -> ShapeKind {
        self.input_shape
    }

    /// Declared output shape.
    #[must_use]
    pub fn output_shape(&self) -> ShapeKind {
        self.output_shape
    }

    /// Number of pre-processors.
    #[must_use]
    pub fn pre_len(&self) -> usize {
        self.pre.len()
    }

    /// Number of post-processors.
    #[must_use]
    pub fn post_len(&self) -> usize {
        self.post.len()
    }

    /// Run the pipeline: fold the input through the pre-processors, apply
    /// the executor, fold the result through the post-processors.
    ///
    /// The fold is strictly sequential.  The deadline on `ctx` is checked
    /// before every step; once it passes, the run aborts with a *timeout*
    /// error.  Any step error aborts the run and is propagated with the
    /// pipeline and step name attached.
    ///
    /// # Errors
    ///
    /// *internal* on a shape mismatch; *timeout* past the deadline; any
    /// step error otherwise.
    pub async fn execute(
        &self,
        input: CanonicalInput,
        ctx: &PipelineContext,
    ) -> Result<CanonicalOutput> {
        ctx.mark(meta::PIPELINE_PROCESSOR_AT);
        if input.shape() != self.input_shape {
            return Err(CshError::internal(format!(
                "pipeline '{}' expects input shape '{}', got '{}'",
                self.name,
                self.input_shape,
                input.shape()
            )));
        }

        let mut acc = input;
        for step in &self.pre {
            ctx.check_deadline()
                .map_err(|err| self.step_context(err, step.name()))?;
            debug!(target: "csh.pipeline", pipeline = %self.name, step = step.name(), "pre");
            acc = step
                .apply(acc, ctx)
                .await
                .map_err(|err| self.step_context(err, step.name()))?;
        }

        ctx.check_deadline()
            .map_err(|err| self.step_context(err, self.exec.name()))?;
        debug!(target: "csh.pipeline", pipeline = %self.name, step = self.exec.name(), "exec");
        let mut out = self
            .exec
            .apply(acc, ctx)
            .await
            .map_err(|err| self.step_context(err, self.exec.name()))?;
        if out.shape() != self.output_shape {
            return Err(CshError::internal(format!(
                "pipeline '{}' declares output shape '{}', executor produced '{}'",
                self.name,
                self.output_shape,
                out.shape()
            )));
        }

        for step in &self.post {
            ctx.check_deadline()
                .map_err(|err| self.step_context(err, step.name()))?;
            debug!(target: "csh.pipeline", pipeline = %self.name, step = step.name(), "post");
            out = step
                .apply(out, ctx)
                .await
                .map_err(|err| self.step_context(err, step.name()))?;
        }

        Ok(out)
    }

    /// Schedule [`execute`](Self::execute) onto the runtime, returning the
    /// join handle.  Cancellation propagates through the context deadline.
    #[must_use]
    pub fn spawn(
        self: &Arc<Self>,
        input: CanonicalInput,
        ctx: Arc<PipelineContext>,
    ) -> JoinHandle<Result<CanonicalOutput>> {
        let processor = Arc::clone(self);
        tokio::spawn(async move { processor.execute(input, &ctx).await })
    }

    fn step_context(&self, err: CshError, step: &str) -> CshError {
        err.with_context("pipeline", self.name.clone())
            .with_context("step", step.to_string())
    }
}

impl std::fmt::Debug for PipelineProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineProcessor")
            .field("name", &self.name)
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{AnnotatePost, EchoExecutor, IdentityPre};
    use crate::StepConfig;
    use chrono::Utc;
    use csh_core::JsonMap;
    use serde_json::json;

    fn echo_processor(pre: usize, post: bool) -> PipelineProcessor {
        let pre_steps: Vec<Arc<dyn PreProcessor>> = (0..pre)
            .map(|i| {
                Arc::new(IdentityPre::new(&StepConfig {
                    name: format!("pre-{i}"),
                    ..Default::default()
                })) as Arc<dyn PreProcessor>
            })
            .collect();
        let post_steps: Vec<Arc<dyn PostProcessor>> = if post {
            vec![Arc::new(AnnotatePost::new(&StepConfig {
                name: "annotate".into(),
                template: Some("stage=done".into()),
                ..Default::default()
            })) as Arc<dyn PostProcessor>]
        } else {
            Vec::new()
        };
        PipelineProcessor::new(
            "test-pipeline",
            ShapeKind::Record,
            ShapeKind::Record,
            pre_steps,
            Arc::new(EchoExecutor::new(&StepConfig {
                name: "echo".into(),
                ..Default::default()
            })),
            post_steps,
        )
    }

    fn record_input(entries: &[(&str, serde_json::Value)]) -> CanonicalInput {
        let data: JsonMap = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        CanonicalInput::from_parts(ShapeKind::Record, data, JsonMap::new())
    }

    #[tokio::test]
    async fn identity_pipeline_preserves_data() {
        let processor = echo_processor(0, false);
        let ctx = PipelineContext::new();
        let out = processor
            .execute(record_input(&[("x", json!(1))]), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data().get("x"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn processor_marks_entry_timestamp() {
        let processor = echo_processor(0, false);
        let ctx = PipelineContext::new();
        processor
            .execute(record_input(&[]), &ctx)
            .await
            .unwrap();
        assert!(ctx.get(meta::PIPELINE_PROCESSOR_AT).is_some());
    }

    #[tokio::test]
    async fn post_processors_see_executor_output() {
        let processor = echo_processor(2, true);
        let ctx = PipelineContext::new();
        let out = processor
            .execute(record_input(&[("x", json!(1))]), &ctx)
            .await
            .unwrap();
        assert_eq!(out.metadata().get("stage"), Some(&json!("done")));
        assert_eq!(out.data().get("x"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn wrong_input_shape_is_internal() {
        let processor = echo_processor(0, false);
        let ctx = PipelineContext::new();
        let input = CanonicalInput::new(ShapeKind::Document);
        let err = processor.execute(input, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), csh_error::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn expired_deadline_aborts_before_executor() {
        let processor = echo_processor(0, false);
        let ctx =
            PipelineContext::new().with_deadline(Some(Utc::now() - chrono::Duration::seconds(1)));
        let err = processor
            .execute(record_input(&[]), &ctx)
            .await
            .unwrap_err();
        assert!(err.kind().is_timeout());
        assert_eq!(
            err.context().get("pipeline"),
            Some(&json!("test-pipeline"))
        );
    }

    #[tokio::test]
    async fn failing_pre_step_aborts_with_context() {
        struct Failing;
        #[async_trait::async_trait]
        impl PreProcessor for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            async fn apply(
                &self,
                _input: CanonicalInput,
                _ctx: &PipelineContext,
            ) -> Result<CanonicalInput> {
                Err(CshError::bad_request("x must be positive"))
            }
        }

        let processor = PipelineProcessor::new(
            "p",
            ShapeKind::Record,
            ShapeKind::Record,
            vec![Arc::new(Failing)],
            Arc::new(EchoExecutor::new(&StepConfig::default())),
            Vec::new(),
        );
        let err = processor
            .execute(record_input(&[("x", json!(-1))]), &PipelineContext::new())
            .await
            .unwrap_err();
        assert!(err.kind().is_bad_request());
        assert_eq!(err.context().get("step"), Some(&json!("failing")));
    }

    #[tokio::test]
    async fn spawn_runs_on_the_runtime() {
        let processor = Arc::new(echo_processor(1, false));
        let ctx = Arc::new(PipelineContext::new());
        let handle = processor.spawn(record_input(&[("x", json!(5))]), ctx);
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.data().get("x"), Some(&json!(5)));
    }
}
