//! Catalog of known collectors and their enabled state
//!
//! The registry is filled in three steps before it is shared: every
//! collector is registered with its default state, explicit overrides are
//! applied, and finally [`CollectorRegistry::disable_all_unforced`] may turn
//! off everything that was not explicitly enabled. Registration and overrides
//! need `&mut self`, resolution only `&self`, so once the registry sits behind
//! an `Arc` its configuration is frozen.
//!
//! Collector instances are created lazily on first resolution and then
//! reused for the lifetime of the process.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;

use crate::collector::{AggregateCollector, Collector, CollectorError};

/// Errors raised while configuring or resolving collectors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("missing collector: {0}")]
    UnknownCollector(String),

    #[error("disabled collector: {0}")]
    DisabledCollector(String),

    #[error("collector registered twice: {0}")]
    DuplicateCollector(String),

    #[error("couldn't create collector {name}: {source}")]
    Factory {
        name: String,
        #[source]
        source: CollectorError,
    },
}

/// Builds a collector for the given cgroup directories
pub type CollectorFactory =
    Box<dyn Fn(&[PathBuf]) -> Result<Arc<dyn Collector>, CollectorError> + Send + Sync>;

struct Entry {
    default_enabled: bool,
    enabled: bool,
    forced: bool,
    factory: CollectorFactory,
    instance: OnceCell<Arc<dyn Collector>>,
}

/// Enabled state of a registered collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorState {
    pub name: String,
    pub enabled: bool,
    pub default_enabled: bool,
}

/// Registry of collector factories, overrides and instantiated collectors
#[derive(Default)]
pub struct CollectorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl CollectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector under a unique name
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        default_enabled: bool,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[PathBuf]) -> Result<Arc<dyn Collector>, CollectorError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateCollector(name));
        }

        self.entries.insert(
            name,
            Entry {
                default_enabled,
                enabled: default_enabled,
                forced: false,
                factory: Box::new(factory),
                instance: OnceCell::new(),
            },
        );

        Ok(())
    }

    /// Explicitly enable or disable a collector, overriding its default
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownCollector(name.to_string()))?;

        entry.enabled = enabled;
        entry.forced = true;
        Ok(())
    }

    /// Disable every collector that was not explicitly enabled or disabled
    pub fn disable_all_unforced(&mut self) {
        for entry in self.entries.values_mut().filter(|entry| !entry.forced) {
            entry.enabled = false;
        }
    }

    /// Whether a collector is enabled, `None` if it is unknown
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.entries.get(name).map(|entry| entry.enabled)
    }

    /// State of every registered collector, sorted by name
    pub fn states(&self) -> Vec<CollectorState> {
        self.entries
            .iter()
            .map(|(name, entry)| CollectorState {
                name: name.clone(),
                enabled: entry.enabled,
                default_enabled: entry.default_enabled,
            })
            .collect()
    }

    /// Resolve the enabled collectors, or only `filters` when non-empty.
    ///
    /// Every filtered name must be registered and enabled.
    pub fn resolve(
        &self,
        directories: &[PathBuf],
        filters: &[String],
    ) -> Result<AggregateCollector, RegistryError> {
        let mut wanted = BTreeSet::new();
        for filter in filters {
            match self.entries.get(filter) {
                None => return Err(RegistryError::UnknownCollector(filter.clone())),
                Some(entry) if !entry.enabled => {
                    return Err(RegistryError::DisabledCollector(filter.clone()));
                }
                Some(_) => {
                    wanted.insert(filter.as_str());
                }
            }
        }

        let mut collectors = BTreeMap::new();
        for (name, entry) in &self.entries {
            if !entry.enabled || (!wanted.is_empty() && !wanted.contains(name.as_str())) {
                continue;
            }
            collectors.insert(name.clone(), Self::instance(name, entry, directories)?);
        }

        Ok(AggregateCollector::new(collectors))
    }

    fn instance(
        name: &str,
        entry: &Entry,
        directories: &[PathBuf],
    ) -> Result<Arc<dyn Collector>, RegistryError> {
        entry
            .instance
            .get_or_try_init(|| {
                debug!("Creating collector collector={}", name);
                (entry.factory)(directories)
            })
            .cloned()
            .map_err(|source| RegistryError::Factory {
                name: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MetricSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Noop(String);

    #[async_trait::async_trait]
    impl Collector for Noop {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            Ok(())
        }

        fn name(&self) -> &str {
            &self.0
        }
    }

    fn noop(name: &'static str) -> impl Fn(&[PathBuf]) -> Result<Arc<dyn Collector>, CollectorError> {
        move |_: &[PathBuf]| Ok(Arc::new(Noop(name.to_string())) as Arc<dyn Collector>)
    }

    fn registry() -> CollectorRegistry {
        let mut registry = CollectorRegistry::new();
        registry.register("cpu.stat", true, noop("cpu.stat")).unwrap();
        registry.register("memory.current", true, noop("memory.current")).unwrap();
        registry.register("pids.max", false, noop("pids.max")).unwrap();
        registry
    }

    fn names(aggregate: &AggregateCollector) -> Vec<&str> {
        aggregate.names().collect()
    }

    #[test]
    fn test_resolve_enabled() {
        let registry = registry();
        let aggregate = registry.resolve(&[], &[]).unwrap();
        assert_eq!(names(&aggregate), vec!["cpu.stat", "memory.current"]);
    }

    #[test]
    fn test_resolve_filtered() {
        let registry = registry();
        let aggregate = registry.resolve(&[], &["memory.current".to_string()]).unwrap();
        assert_eq!(names(&aggregate), vec!["memory.current"]);
    }

    #[test]
    fn test_resolve_rejects_bad_filters() {
        let registry = registry();

        let err = registry.resolve(&[], &["nope".to_string()]).err().unwrap();
        assert!(matches!(err, RegistryError::UnknownCollector(name) if name == "nope"));

        let err = registry.resolve(&[], &["pids.max".to_string()]).err().unwrap();
        assert!(matches!(err, RegistryError::DisabledCollector(name) if name == "pids.max"));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = registry();
        let err = registry.register("cpu.stat", false, noop("cpu.stat")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCollector(_)));
    }

    #[test]
    fn test_overrides_and_disable_defaults() {
        let mut registry = registry();
        registry.set_enabled("pids.max", true).unwrap();
        registry.set_enabled("memory.current", true).unwrap();
        registry.disable_all_unforced();

        assert_eq!(registry.is_enabled("cpu.stat"), Some(false));
        assert_eq!(registry.is_enabled("memory.current"), Some(true));
        assert_eq!(registry.is_enabled("pids.max"), Some(true));
        assert!(registry.set_enabled("nope", true).is_err());

        let states = registry.states();
        assert_eq!(
            states[0],
            CollectorState {
                name: "cpu.stat".to_string(),
                enabled: false,
                default_enabled: true,
            }
        );
    }

    #[test]
    fn test_instances_are_reused() {
        let registry = registry();
        let first = registry.resolve(&[], &[]).unwrap();
        let second = registry.resolve(&[], &["cpu.stat".to_string()]).unwrap();

        assert!(Arc::ptr_eq(
            first.get("cpu.stat").unwrap(),
            second.get("cpu.stat").unwrap()
        ));
    }

    #[test]
    fn test_concurrent_resolution_builds_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CollectorRegistry::new();
        {
            let calls = Arc::clone(&calls);
            registry
                .register("cpu.stat", true, move |_: &[PathBuf]| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(20));
                    Ok(Arc::new(Noop("cpu.stat".to_string())) as Arc<dyn Collector>)
                })
                .unwrap();
        }
        let registry = Arc::new(registry);

        let instances: Vec<Arc<dyn Collector>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || {
                        let aggregate = registry.resolve(&[], &[]).unwrap();
                        Arc::clone(aggregate.get("cpu.stat").unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(instances.len(), 16);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[test]
    fn test_failed_factory_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CollectorRegistry::new();
        {
            let calls = Arc::clone(&calls);
            registry
                .register("flaky", true, move |_: &[PathBuf]| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CollectorError::NoData)
                    } else {
                        Ok(Arc::new(Noop("flaky".to_string())) as Arc<dyn Collector>)
                    }
                })
                .unwrap();
        }

        assert!(matches!(
            registry.resolve(&[], &[]),
            Err(RegistryError::Factory { .. })
        ));
        assert!(registry.resolve(&[], &[]).is_ok());
    }
}
