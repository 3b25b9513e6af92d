// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for the end-to-end tests: an embedded configuration,
//! recording wrappers around the built-in source/engine/server factories,
//! and a custom executor pool exercising the plug-in surface.

#![allow(dead_code)]

use csh_capability::Capability;
use csh_config::{ConfigSource, ConfigurationManager, EngineSpec, SourceSpec};
use csh_core::{CanonicalInput, CanonicalOutput};
use csh_dispatch::server::{ChannelHub, ChannelServerFactory, Server, ServerFactory};
use csh_dispatch::{Dispatcher, TransportKind};
use csh_engine::passthrough::PassthroughEngineFactory;
use csh_engine::{Engine, EngineConfig, QueryEngineFactory};
use csh_error::{CshError, Result};
use csh_pipeline::{Executor, PipelineContext, StepConfig, StepInstance};
use csh_plugin::PluginCatalog;
use csh_runtime::Core;
use csh_source::memory::MemorySourceFactory;
use csh_source::{Source, SourceConfig, SourceProviderFactory, SourceProviderManager};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// Shared, ordered log of lifecycle observations.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn position(log: &[String], needle: &str) -> usize {
    log.iter()
        .position(|entry| entry == needle)
        .unwrap_or_else(|| panic!("'{needle}' not in {log:?}"))
}

// ---------------------------------------------------------------------------
// Recording source provider
// ---------------------------------------------------------------------------

struct RecordingSource {
    inner: Arc<dyn Source>,
    log: EventLog,
}

#[async_trait::async_trait]
impl Source for RecordingSource {
    async fn open(&self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("open:source:{}", self.inner.config().name));
        self.inner.open().await
    }

    async fn close(&self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("close:source:{}", self.inner.config().name));
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn config(&self) -> &SourceConfig {
        self.inner.config()
    }

    async fn execute(&self, query: csh_source::SourceQuery) -> Result<csh_source::SourceResult> {
        self.inner.execute(query).await
    }
}

pub struct RecordingSourceFactory {
    inner: MemorySourceFactory,
    log: EventLog,
}

impl RecordingSourceFactory {
    pub fn new(log: &EventLog) -> Self {
        Self {
            inner: MemorySourceFactory,
            log: Arc::clone(log),
        }
    }
}

#[async_trait::async_trait]
impl SourceProviderFactory for RecordingSourceFactory {
    fn id(&self) -> &str {
        "memory"
    }

    fn config_kind(&self) -> &str {
        "memory"
    }

    fn adapt(&self, name: &str, spec: &SourceSpec) -> Result<SourceConfig> {
        self.inner.adapt(name, spec)
    }

    fn validate(&self, config: &SourceConfig) -> Result<()> {
        self.inner.validate(config)
    }

    async fn create(&self, config: SourceConfig) -> Result<Arc<dyn Source>> {
        let inner = self.inner.create(config).await?;
        Ok(Arc::new(RecordingSource {
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}

// ---------------------------------------------------------------------------
// Recording engine
// ---------------------------------------------------------------------------

struct RecordingEngine {
    inner: Arc<dyn Engine>,
    log: EventLog,
}

#[async_trait::async_trait]
impl Engine for RecordingEngine {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn open(&self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("open:engine:{}", self.inner.name()));
        self.inner.open().await
    }

    async fn close(&self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("close:engine:{}", self.inner.name()));
        self.inner.close().await
    }

    async fn execute(
        &self,
        query: csh_engine::LogicalQuery,
        ctx: &csh_engine::EngineContext,
    ) -> Result<csh_engine::EngineResult> {
        self.inner.execute(query, ctx).await
    }

    fn validate(&self, query: &csh_engine::LogicalQuery) -> bool {
        self.inner.validate(query)
    }

    fn explain(&self, query: &csh_engine::LogicalQuery) -> String {
        self.inner.explain(query)
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }
}

pub struct RecordingEngineFactory {
    inner: PassthroughEngineFactory,
    log: EventLog,
}

impl RecordingEngineFactory {
    pub fn new(log: &EventLog) -> Self {
        Self {
            inner: PassthroughEngineFactory,
            log: Arc::clone(log),
        }
    }
}

#[async_trait::async_trait]
impl QueryEngineFactory for RecordingEngineFactory {
    fn id(&self) -> &str {
        "passthrough"
    }

    fn config_kind(&self) -> &str {
        "passthrough"
    }

    fn adapt(
        &self,
        name: &str,
        spec: &EngineSpec,
        resolved_sources: &IndexMap<String, SourceSpec>,
    ) -> Result<EngineConfig> {
        self.inner.adapt(name, spec, resolved_sources)
    }

    fn validate(&self, config: &EngineConfig) -> Result<()> {
        self.inner.validate(config)
    }

    async fn create(
        &self,
        config: EngineConfig,
        sources: Arc<SourceProviderManager>,
    ) -> Result<Arc<dyn Engine>> {
        let inner = self.inner.create(config, sources).await?;
        Ok(Arc::new(RecordingEngine {
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}

// ---------------------------------------------------------------------------
// Recording server
// ---------------------------------------------------------------------------

struct RecordingServer {
    inner: Arc<dyn Server>,
    capability: String,
    log: EventLog,
}

#[async_trait::async_trait]
impl Server for RecordingServer {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn start(&self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start:server:{}", self.capability));
        self.inner.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("close:server:{}", self.capability));
        self.inner.stop().await
    }

    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

pub struct RecordingServerFactory {
    inner: ChannelServerFactory,
    log: EventLog,
}

impl RecordingServerFactory {
    pub fn new(hub: Arc<ChannelHub>, log: &EventLog) -> Self {
        Self {
            inner: ChannelServerFactory::new(hub),
            log: Arc::clone(log),
        }
    }
}

impl ServerFactory for RecordingServerFactory {
    fn id(&self) -> &str {
        "channel"
    }

    fn create(
        &self,
        capability: Arc<Capability>,
        binding: TransportKind,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Arc<dyn Server>> {
        let name = capability.name().to_string();
        let inner = self.inner.create(capability, binding, dispatcher)?;
        Ok(Arc::new(RecordingServer {
            inner,
            capability: name,
            log: Arc::clone(&self.log),
        }))
    }
}

// ---------------------------------------------------------------------------
// Custom executors (plug-in surface)
// ---------------------------------------------------------------------------

/// Executor that rejects records whose `x` entry is negative.
struct PositiveExecutor;

#[async_trait::async_trait]
impl Executor for PositiveExecutor {
    fn name(&self) -> &str {
        "positive"
    }

    async fn apply(&self, input: CanonicalInput, _ctx: &PipelineContext) -> Result<CanonicalOutput> {
        if let Some(x) = input.data().get("x").and_then(|v| v.as_i64())
            && x < 0
        {
            return Err(CshError::bad_request("x must not be negative"));
        }
        Ok(CanonicalOutput::from_parts(
            input.shape(),
            input.data().clone(),
            input.metadata().clone(),
        ))
    }
}

/// Executor that only serves callers holding the `reader` role.
struct SecureExecutor;

#[async_trait::async_trait]
impl Executor for SecureExecutor {
    fn name(&self) -> &str {
        "secure"
    }

    async fn apply(&self, input: CanonicalInput, ctx: &PipelineContext) -> Result<CanonicalOutput> {
        if !ctx.security.has_role("reader") {
            return Err(CshError::unauthorized("caller lacks the reader role"));
        }
        Ok(CanonicalOutput::from_parts(
            input.shape(),
            input.data().clone(),
            input.metadata().clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Configuration and core assembly
// ---------------------------------------------------------------------------

const MAIN: &str = r#"
metadata:
  name: e2e
  version: "1.0"
sources:
  db-a:
    factory: memory
    type: memory
    extras:
      seed:
        posts:
          - { id: 1, title: first }
          - { id: 2, title: second }
  db-b:
    factory: memory
    type: memory
engines:
  eng-1:
    factory: passthrough
    sources: [db-a, db-b]
transports:
  main:
    factory: channel
exposures:
  main:
    binding: http_json
    version: v1
    path: /api
capabilities:
  blog:
    description: end-to-end test capability
    domain: content
    exposure: main
    transport: main
    sources: [db-a, db-b]
    engine: eng-1
    actions-specification-file: blog/actions.yaml
    pipelines-definition-file: blog/pipelines.yaml
"#;

const ACTIONS: &str = r#"
ping:
  description: echo the payload
  pipeline: ping-pipeline
list:
  description: scan the posts table
  pipeline: list-pipeline
checked:
  description: echo with validation
  pipeline: checked-pipeline
secret:
  description: echo behind a role check
  pipeline: secret-pipeline
"#;

const PIPELINES: &str = r#"
ping-pipeline:
  input: record
  output: record
  steps:
    execute:
      name: echo
      implementation: echo
list-pipeline:
  input: record
  output: record-set
  steps:
    execute:
      name: scan
      implementation: engine-query
      template: scan posts
    post:
      - name: stamp
        implementation: annotate
        template: served-by=cheshire
checked-pipeline:
  input: record
  output: record
  steps:
    execute:
      name: guard
      implementation: positive
secret-pipeline:
  input: record
  output: record
  steps:
    execute:
      name: gate
      implementation: secure
"#;

pub fn config_source() -> ConfigSource {
    ConfigSource::embedded([
        ("cheshire.yaml", MAIN),
        ("blog/actions.yaml", ACTIONS),
        ("blog/pipelines.yaml", PIPELINES),
    ])
}

pub struct Fixture {
    pub core: Arc<Core>,
    pub hub: Arc<ChannelHub>,
    pub log: EventLog,
}

/// Assemble (but do not start) a core over the embedded configuration,
/// with every factory wrapped to record lifecycle events.
pub fn fixture() -> Fixture {
    let log = new_log();
    let hub = Arc::new(ChannelHub::new());

    let mut catalog = PluginCatalog::new();
    catalog
        .register_source_factory(Arc::new(RecordingSourceFactory::new(&log)))
        .unwrap();
    catalog
        .register_engine_factory(Arc::new(RecordingEngineFactory::new(&log)))
        .unwrap();
    catalog
        .register_server_factory(Arc::new(RecordingServerFactory::new(
            Arc::clone(&hub),
            &log,
        )))
        .unwrap();
    for (id, constructor) in csh_pipeline::builtin_steps() {
        catalog.register_step(id, constructor).unwrap();
    }
    catalog
        .register_step(
            "positive",
            Box::new(|_: &StepConfig| Ok(StepInstance::Exec(Arc::new(PositiveExecutor)))),
        )
        .unwrap();
    catalog
        .register_step(
            "secure",
            Box::new(|_: &StepConfig| Ok(StepInstance::Exec(Arc::new(SecureExecutor)))),
        )
        .unwrap();

    let config = ConfigurationManager::from_source(&config_source()).unwrap();
    let core = Arc::new(Core::bootstrap(config, catalog).unwrap());
    Fixture { core, hub, log }
}
