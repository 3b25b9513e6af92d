// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed, name-keyed, thread-safe registries with ordered shutdown.
//!
//! A [`Registry`] is parameterized by its element type and a shutdown
//! action supplied at construction.  Registration order is preserved;
//! [`Registry::shutdown`] walks entries in strict **reverse** registration
//! order, invoking the shutdown action for each and swallowing (but
//! logging) per-entry failures.  All operations are linearizable with
//! respect to one another.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use csh_error::CshError;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The supplied name was blank.
    #[error("{registry}: entry name must not be blank")]
    BlankName {
        /// Registry the operation targeted.
        registry: String,
    },
    /// An entry with this name is already registered.
    #[error("{registry}: '{name}' is already registered")]
    AlreadyRegistered {
        /// Registry the operation targeted.
        registry: String,
        /// Colliding name.
        name: String,
    },
    /// No entry with this name is registered.
    #[error("{registry}: '{name}' is not registered")]
    NotRegistered {
        /// Registry the operation targeted.
        registry: String,
        /// Name that was looked up.
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Async shutdown action invoked per entry during [`Registry::shutdown`].
pub type ShutdownFn<T> =
    Box<dyn Fn(String, Arc<T>) -> BoxFuture<'static, Result<(), CshError>> + Send + Sync>;

/// A thread-safe, insertion-ordered registry of named `Arc<T>` entries.
pub struct Registry<T: ?Sized + Send + Sync + 'static> {
    name: String,
    entries: RwLock<IndexMap<String, Arc<T>>>,
    on_shutdown: ShutdownFn<T>,
}

impl<T: ?Sized + Send + Sync + 'static> Registry<T> {
    /// Create a registry with the given display name and shutdown action.
    pub fn new(name: impl Into<String>, on_shutdown: ShutdownFn<T>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(IndexMap::new()),
            on_shutdown,
        }
    }

    /// Create a registry whose shutdown action does nothing.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, Box::new(|_, _| Box::pin(async { Ok(()) })))
    }

    /// Display name of this registry (used in errors and logs).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an entry under `name`.
    ///
    /// # Errors
    ///
    /// Fails when the name is blank or already bound.
    pub fn register(&self, name: impl Into<String>, item: Arc<T>) -> Result<(), RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::BlankName {
                registry: self.name.clone(),
            });
        }
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered {
                registry: self.name.clone(),
                name,
            });
        }
        debug!(target: "csh.registry", registry = %self.name, entry = %name, "registered");
        entries.insert(name, item);
        Ok(())
    }

    /// Look up an entry by name.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::NotRegistered`] when absent.
    pub fn get(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                registry: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Returns `true` if an entry with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    /// Entry names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Consistent snapshot of all entries, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Arc<T>)> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    /// Returns `true` when no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down every entry in reverse registration order, then clear.
    ///
    /// Per-entry failures are logged and swallowed; every entry's shutdown
    /// action runs exactly once even when earlier ones fail.  A second call
    /// is a no-op.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<T>)> = {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            entries.drain(..).collect()
        };
        for (name, item) in drained.into_iter().rev() {
            debug!(target: "csh.registry", registry = %self.name, entry = %name, "shutting down");
            if let Err(err) = (self.on_shutdown)(name.clone(), item).await {
                warn!(
                    target: "csh.registry",
                    registry = %self.name,
                    entry = %name,
                    error = %err,
                    "entry shutdown failed"
                );
            }
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("entries", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn register_and_get() {
        let reg: Registry<String> = Registry::noop("things");
        reg.register("a", Arc::new("alpha".to_string())).unwrap();
        assert_eq!(*reg.get("a").unwrap(), "alpha");
    }

    #[test]
    fn blank_name_is_rejected() {
        let reg: Registry<String> = Registry::noop("things");
        let err = reg.register("  ", Arc::new("x".to_string())).unwrap_err();
        assert!(matches!(err, RegistryError::BlankName { .. }));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let reg: Registry<String> = Registry::noop("things");
        reg.register("a", Arc::new("one".to_string())).unwrap();
        let err = reg.register("a", Arc::new("two".to_string())).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        // The original binding survives.
        assert_eq!(*reg.get("a").unwrap(), "one");
    }

    #[test]
    fn missing_name_gives_distinct_error() {
        let reg: Registry<String> = Registry::noop("things");
        let err = reg.get("ghost").unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered { .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn names_preserve_registration_order() {
        let reg: Registry<u32> = Registry::noop("numbers");
        reg.register("z", Arc::new(1)).unwrap();
        reg.register("a", Arc::new(2)).unwrap();
        reg.register("m", Arc::new(3)).unwrap();
        assert_eq!(reg.names(), ["z", "a", "m"]);
    }

    #[tokio::test]
    async fn shutdown_runs_in_reverse_order_exactly_once() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let reg: Registry<u32> = Registry::new(
            "numbers",
            Box::new(move |name, _| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(name);
                    Ok(())
                })
            }),
        );
        reg.register("first", Arc::new(1)).unwrap();
        reg.register("second", Arc::new(2)).unwrap();
        reg.register("third", Arc::new(3)).unwrap();

        reg.shutdown().await;
        assert_eq!(*order.lock().unwrap(), ["third", "second", "first"]);
        assert!(reg.is_empty());

        // Second shutdown is a no-op: no additional calls.
        reg.shutdown().await;
        assert_eq!(order.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn shutdown_swallows_per_entry_failures() {
        let count = Arc::new(Mutex::new(0u32));
        let counted = Arc::clone(&count);
        let reg: Registry<u32> = Registry::new(
            "numbers",
            Box::new(move |name, _| {
                let counted = Arc::clone(&counted);
                Box::pin(async move {
                    *counted.lock().unwrap() += 1;
                    if name == "bad" {
                        Err(CshError::execution("close failed"))
                    } else {
                        Ok(())
                    }
                })
            }),
        );
        reg.register("good-1", Arc::new(1)).unwrap();
        reg.register("bad", Arc::new(2)).unwrap();
        reg.register("good-2", Arc::new(3)).unwrap();

        reg.shutdown().await;
        // Every entry was attempted despite the failure in the middle.
        assert_eq!(*count.lock().unwrap(), 3);
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_is_consistent_and_ordered() {
        let reg: Registry<u32> = Registry::noop("numbers");
        reg.register("a", Arc::new(1)).unwrap();
        reg.register("b", Arc::new(2)).unwrap();
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, "a");
        assert_eq!(snap[1].0, "b");
        // Mutating the registry afterwards does not affect the snapshot.
        reg.register("c", Arc::new(3)).unwrap();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn works_with_unsized_trait_objects() {
        trait Named: Send + Sync {
            fn name(&self) -> &str;
        }
        struct A;
        impl Named for A {
            fn name(&self) -> &str {
                "a"
            }
        }
        let reg: Registry<dyn Named> = Registry::noop("named");
        reg.register("a", Arc::new(A)).unwrap();
        assert_eq!(reg.get("a").unwrap().name(), "a");
    }
}
