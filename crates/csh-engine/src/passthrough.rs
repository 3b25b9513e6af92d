// SPDX-License-Identifier: MIT OR Apache-2.0
//! The passthrough engine.
//!
//! Performs no planning: a logical query is forwarded verbatim to one of
//! the engine's bound sources (the query's `target`, or the first bound
//! source when unset).  The reference engine implementation.

use crate::{
    Engine, EngineConfig, EngineContext, EngineResult, LogicalQuery, QueryEngineFactory,
};
use chrono::Utc;
use csh_config::EngineSpec;
use csh_config::SourceSpec;
use csh_core::JsonMap;
use csh_error::{CshError, Result};
use csh_source::{SourceProviderManager, SourceQuery};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Factory id and config kind of the passthrough engine.
pub const PASSTHROUGH_ENGINE: &str = "passthrough";

/// Forwards logical queries to a single bound source.
pub struct PassthroughEngine {
    config: EngineConfig,
    sources: Arc<SourceProviderManager>,
    open: AtomicBool,
}

impl PassthroughEngine {
    /// Create a closed engine over the given config and source lookup.
    #[must_use]
    pub fn new(config: EngineConfig, sources: Arc<SourceProviderManager>) -> Self {
        Self {
            config,
            sources,
            open: AtomicBool::new(false),
        }
    }

    fn target_source<'a>(&'a self, query: &'a LogicalQuery) -> Result<&'a str> {
        if let Some(target) = &query.target {
            if self.config.sources.contains_key(target) {
                return Ok(target.as_str());
            }
            return Err(CshError::bad_request(format!(
                "engine '{}' does not bind source '{target}'",
                self.config.name
            )));
        }
        self.config
            .sources
            .keys()
            .next()
            .map(String::as_str)
            .ok_or_else(|| {
                CshError::configuration(format!(
                    "engine '{}' binds no sources",
                    self.config.name
                ))
            })
    }
}

#[async_trait::async_trait]
impl Engine for PassthroughEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, query: LogicalQuery, ctx: &EngineContext) -> Result<EngineResult> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CshError::connection(format!(
                "engine '{}' is not open",
                self.config.name
            )));
        }
        if let Some(deadline) = ctx.deadline
            && Utc::now() > deadline
        {
            return Err(CshError::timeout(format!(
                "engine '{}' deadline exceeded before execution",
                self.config.name
            )));
        }

        let target = self.target_source(&query)?.to_string();
        let source = self.sources.get(&target)?;
        let result = source
            .execute(SourceQuery {
                statement: query.statement,
                params: query.params,
            })
            .await?;

        let mut metadata = JsonMap::new();
        metadata.insert("engine".into(), serde_json::Value::from(self.config.name.clone()));
        metadata.insert("source".into(), serde_json::Value::from(target));
        metadata.extend(result.metadata);
        Ok(EngineResult {
            rows: result.rows,
            metadata,
        })
    }

    fn validate(&self, query: &LogicalQuery) -> bool {
        !query.statement.trim().is_empty() && self.target_source(query).is_ok()
    }

    fn explain(&self, query: &LogicalQuery) -> String {
        match self.target_source(query) {
            Ok(target) => format!(
                "passthrough '{}' -> source '{}': {}",
                self.config.name, target, query.statement
            ),
            Err(err) => format!("passthrough '{}': unroutable ({err})", self.config.name),
        }
    }
}

/// Engine factory for [`PassthroughEngine`]s.
#[derive(Debug, Default)]
pub struct PassthroughEngineFactory;

#[async_trait::async_trait]
impl QueryEngineFactory for PassthroughEngineFactory {
    fn id(&self) -> &str {
        PASSTHROUGH_ENGINE
    }

    fn config_kind(&self) -> &str {
        PASSTHROUGH_ENGINE
    }

    fn adapt(
        &self,
        name: &str,
        spec: &EngineSpec,
        resolved_sources: &IndexMap<String, SourceSpec>,
    ) -> Result<EngineConfig> {
        Ok(EngineConfig {
            name: name.to_string(),
            kind: PASSTHROUGH_ENGINE.to_string(),
            sources: resolved_sources.clone(),
            extras: spec.extras.clone(),
        })
    }

    fn validate(&self, config: &EngineConfig) -> Result<()> {
        if config.sources.is_empty() {
            return Err(CshError::configuration(format!(
                "passthrough engine '{}' must bind at least one source",
                config.name
            )));
        }
        Ok(())
    }

    async fn create(
        &self,
        config: EngineConfig,
        sources: Arc<SourceProviderManager>,
    ) -> Result<Arc<dyn Engine>> {
        Ok(Arc::new(PassthroughEngine::new(config, sources)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csh_source::memory::MemorySourceFactory;
    use csh_source::SourceProviderFactory;
    use serde_json::json;

    async fn fixture() -> (PassthroughEngine, Arc<SourceProviderManager>) {
        let source_spec: SourceSpec = serde_json::from_value(json!({
            "factory": "memory",
            "type": "memory",
            "extras": {"seed": {"posts": [{"id": 7}]}}
        }))
        .unwrap();
        let specs = IndexMap::from_iter([("db-a".to_string(), source_spec.clone())]);
        let factory: Arc<dyn SourceProviderFactory> = Arc::new(MemorySourceFactory);
        let sources = Arc::new(SourceProviderManager::new(
            specs.clone(),
            IndexMap::from_iter([("memory".to_string(), factory)]),
        ));
        sources.initialize().await.unwrap();

        let engine = PassthroughEngine::new(
            EngineConfig {
                name: "eng-1".into(),
                kind: PASSTHROUGH_ENGINE.into(),
                sources: specs,
                extras: JsonMap::new(),
            },
            Arc::clone(&sources),
        );
        engine.open().await.unwrap();
        (engine, sources)
    }

    #[tokio::test]
    async fn executes_against_the_first_bound_source() {
        let (engine, _sources) = fixture().await;
        let result = engine
            .execute(LogicalQuery::new("scan posts"), &EngineContext::default())
            .await
            .unwrap();
        assert_eq!(result.rows[0].get("id"), Some(&json!(7)));
        assert_eq!(result.metadata.get("source"), Some(&json!("db-a")));
    }

    #[tokio::test]
    async fn unknown_target_is_bad_request() {
        let (engine, _sources) = fixture().await;
        let mut query = LogicalQuery::new("scan posts");
        query.target = Some("db-z".into());
        let err = engine
            .execute(query, &EngineContext::default())
            .await
            .unwrap_err();
        assert!(err.kind().is_bad_request());
    }

    #[tokio::test]
    async fn expired_deadline_is_a_timeout() {
        let (engine, _sources) = fixture().await;
        let ctx = EngineContext {
            deadline: Some(Utc::now() - chrono::Duration::milliseconds(1)),
            ..Default::default()
        };
        let err = engine
            .execute(LogicalQuery::new("scan posts"), &ctx)
            .await
            .unwrap_err();
        assert!(err.kind().is_timeout());
    }

    #[tokio::test]
    async fn closed_engine_refuses_queries() {
        let (engine, _sources) = fixture().await;
        engine.close().await.unwrap();
        let err = engine
            .execute(LogicalQuery::new("scan posts"), &EngineContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), csh_error::ErrorKind::Connection);
    }

    #[tokio::test]
    async fn validate_is_boolean_and_cheap() {
        let (engine, _sources) = fixture().await;
        assert!(engine.validate(&LogicalQuery::new("scan posts")));
        assert!(!engine.validate(&LogicalQuery::new("   ")));
    }

    #[tokio::test]
    async fn explain_names_engine_and_source() {
        let (engine, _sources) = fixture().await;
        let plan = engine.explain(&LogicalQuery::new("scan posts"));
        assert!(plan.contains("eng-1"));
        assert!(plan.contains("db-a"));
        assert!(plan.contains("scan posts"));
    }
}
