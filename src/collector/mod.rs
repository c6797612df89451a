mod aggregate;
mod core;
mod definitions;
mod file;

// Re-export public items
pub use aggregate::AggregateCollector;
pub use self::core::{CGROUP_LABEL, Collector, CollectorError, CounterRule, MetricSink, NAMESPACE};
pub use definitions::{CollectorDefinition, DEFINITIONS, FileFormat, register_defaults};
pub use file::FileCollector;
