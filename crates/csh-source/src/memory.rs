// SPDX-License-Identifier: MIT OR Apache-2.0
//! The in-memory provider.
//!
//! `memory` sources hold named tables of JSON rows and understand a tiny
//! statement grammar: `scan <table>`, `insert <table>` (row taken from the
//! query parameters), and `count <table>`.  Intended for tests, demos, and
//! as the reference provider implementation.

use crate::{Source, SourceConfig, SourceProviderFactory, SourceQuery, SourceResult};
use csh_config::SourceSpec;
use csh_core::JsonMap;
use csh_error::{CshError, Result};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Factory id and config kind of the in-memory provider.
pub const MEMORY_PROVIDER: &str = "memory";

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// An in-memory source: named tables of JSON rows.
pub struct MemorySource {
    config: SourceConfig,
    open: AtomicBool,
    tables: RwLock<IndexMap<String, Vec<JsonMap>>>,
}

impl MemorySource {
    /// Create a closed source; seed tables are read from the config's
    /// `extras.seed` object (`table name -> [rows]`).
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        let mut tables: IndexMap<String, Vec<JsonMap>> = IndexMap::new();
        if let Some(seed) = config.extras.get("seed").and_then(|v| v.as_object()) {
            for (table, rows) in seed {
                let rows: Vec<JsonMap> = rows
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|row| {
                                row.as_object().map(|obj| {
                                    obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                tables.insert(table.clone(), rows);
            }
        }
        Self {
            config,
            open: AtomicBool::new(false),
            tables: RwLock::new(tables),
        }
    }

    fn require_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CshError::connection(format!(
                "memory source '{}' is not open",
                self.config.name
            )))
        }
    }

    fn split_statement(statement: &str) -> Result<(&str, &str)> {
        let mut words = statement.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some(op), Some(table), None) => Ok((op, table)),
            _ => Err(CshError::bad_request(format!(
                "malformed memory statement '{statement}' (expected '<op> <table>')"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Source for MemorySource {
    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn execute(&self, query: SourceQuery) -> Result<SourceResult> {
        self.require_open()?;
        let (op, table) = Self::split_statement(&query.statement)?;
        match op {
            "scan" => {
                let tables = self.tables.read().expect("tables lock poisoned");
                let rows = tables.get(table).cloned().unwrap_or_default();
                Ok(SourceResult {
                    rows,
                    affected: 0,
                    metadata: JsonMap::new(),
                })
            }
            "insert" => {
                let mut tables = self.tables.write().expect("tables lock poisoned");
                tables.entry(table.to_string()).or_default().push(query.params);
                Ok(SourceResult {
                    rows: Vec::new(),
                    affected: 1,
                    metadata: JsonMap::new(),
                })
            }
            "count" => {
                let tables = self.tables.read().expect("tables lock poisoned");
                let count = tables.get(table).map_or(0, Vec::len);
                let row = JsonMap::from_iter([(
                    "count".to_string(),
                    serde_json::Value::from(count as u64),
                )]);
                Ok(SourceResult {
                    rows: vec![row],
                    affected: 0,
                    metadata: JsonMap::new(),
                })
            }
            other => Err(CshError::bad_request(format!(
                "unsupported memory operation '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Provider factory for [`MemorySource`]s.
#[derive(Debug, Default)]
pub struct MemorySourceFactory;

#[async_trait::async_trait]
impl SourceProviderFactory for MemorySourceFactory {
    fn id(&self) -> &str {
        MEMORY_PROVIDER
    }

    fn config_kind(&self) -> &str {
        MEMORY_PROVIDER
    }

    fn adapt(&self, name: &str, spec: &SourceSpec) -> Result<SourceConfig> {
        Ok(SourceConfig {
            name: name.to_string(),
            kind: spec.kind.clone(),
            connection: spec.connection.clone(),
            pool: spec.pool.clone(),
            extras: spec.extras.clone(),
        })
    }

    fn validate(&self, config: &SourceConfig) -> Result<()> {
        if config.name.trim().is_empty() {
            return Err(CshError::configuration(
                "memory source name must not be blank",
            ));
        }
        if let Some(pool) = &config.pool
            && let Some(max) = pool.max_size
            && max == 0
        {
            return Err(CshError::configuration(format!(
                "memory source '{}': pool max_size must be positive",
                config.name
            )));
        }
        Ok(())
    }

    async fn create(&self, config: SourceConfig) -> Result<Arc<dyn Source>> {
        Ok(Arc::new(MemorySource::new(config)))
    }
}
