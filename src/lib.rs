//! Core of a Prometheus exporter for cgroup v2 control files
//!
//! Control files such as `memory.current` or `cpu.pressure` are read from
//! every tracked cgroup directory, parsed by a format-specific parser and
//! published as counters or gauges labeled with the cgroup name.

pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exporter;
pub mod parser;
pub mod registry;
pub mod sanitize;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::collector::{
        AggregateCollector, Collector, CollectorError, CounterRule, FileCollector, MetricSink,
        register_defaults,
    };
    pub use crate::config::{ExporterConfig, LogLevel};
    pub use crate::discovery::discover_cgroups;
    pub use crate::error::{ExporterError, Result};
    pub use crate::exporter::{Exporter, ExporterOptions};
    pub use crate::parser::{MetricRecord, ParseError, Parser};
    pub use crate::registry::{CollectorRegistry, RegistryError};
    pub use crate::sanitize::sanitize;
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
