//! Built-in catalog of the cgroup v2 files the exporter knows how to read

use std::path::PathBuf;
use std::sync::Arc;

use super::core::{Collector, CounterRule};
use super::file::FileCollector;
use crate::parser::{
    FlatKeyValueParser, NestedKeyValueParser, Parser, RangeListCountParser, SingleValueParser,
};
use crate::registry::{CollectorRegistry, RegistryError};
use crate::sanitize::sanitize;

/// Text layout of a control file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// One number or `max`
    SingleValue,
    /// `key value` lines
    FlatKeyValue,
    /// `id key=value ...` lines, `id` published under `label`
    NestedKeyValue { label: &'static str },
    /// `0-3,8` lists, every id published under `label`
    RangeListCount { label: &'static str },
}

/// Everything needed to build the collector for one control file
#[derive(Debug, Clone, Copy)]
pub struct CollectorDefinition {
    pub file_name: &'static str,
    pub default_enabled: bool,
    pub format: FileFormat,
    pub counter_rule: CounterRule,
}

const PRESSURE: FileFormat = FileFormat::NestedKeyValue { label: "type" };
const PRESSURE_TOTALS: CounterRule = CounterRule::NameSuffix("total");

pub const DEFINITIONS: &[CollectorDefinition] = &[
    CollectorDefinition {
        file_name: "memory.pressure",
        default_enabled: true,
        format: PRESSURE,
        counter_rule: PRESSURE_TOTALS,
    },
    CollectorDefinition {
        file_name: "memory.current",
        default_enabled: true,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "memory.swap.current",
        default_enabled: true,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "memory.high",
        default_enabled: true,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "memory.max",
        default_enabled: false,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "memory.stat",
        default_enabled: true,
        format: FileFormat::FlatKeyValue,
        counter_rule: CounterRule::NameSuffix("_total"),
    },
    CollectorDefinition {
        file_name: "memory.events",
        default_enabled: false,
        format: FileFormat::FlatKeyValue,
        counter_rule: CounterRule::Always,
    },
    CollectorDefinition {
        file_name: "cpu.stat",
        default_enabled: true,
        format: FileFormat::FlatKeyValue,
        counter_rule: CounterRule::Always,
    },
    CollectorDefinition {
        file_name: "cpu.pressure",
        default_enabled: true,
        format: PRESSURE,
        counter_rule: PRESSURE_TOTALS,
    },
    CollectorDefinition {
        file_name: "cpuset.cpus.effective",
        default_enabled: false,
        format: FileFormat::RangeListCount { label: "cpucore" },
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "cpuset.mems.effective",
        default_enabled: false,
        format: FileFormat::RangeListCount { label: "numanode" },
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "io.pressure",
        default_enabled: true,
        format: PRESSURE,
        counter_rule: PRESSURE_TOTALS,
    },
    CollectorDefinition {
        file_name: "io.stat",
        default_enabled: true,
        format: FileFormat::NestedKeyValue { label: "device" },
        counter_rule: CounterRule::Always,
    },
    CollectorDefinition {
        file_name: "pids.current",
        default_enabled: true,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "pids.peak",
        default_enabled: true,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
    CollectorDefinition {
        file_name: "pids.max",
        default_enabled: false,
        format: FileFormat::SingleValue,
        counter_rule: CounterRule::Never,
    },
];

impl CollectorDefinition {
    /// Build the parser for this file, prefixing metrics with the sanitized file name
    pub fn parser(&self) -> Box<dyn Parser> {
        let prefix = sanitize(self.file_name);

        match self.format {
            FileFormat::SingleValue => Box::new(SingleValueParser::new(prefix)),
            FileFormat::FlatKeyValue => Box::new(FlatKeyValueParser::new(prefix)),
            FileFormat::NestedKeyValue { label } => {
                Box::new(NestedKeyValueParser::new(prefix).with_label(label))
            }
            FileFormat::RangeListCount { label } => {
                Box::new(RangeListCountParser::new(prefix).with_label(label))
            }
        }
    }

    /// Build a collector reading this file under every directory
    pub fn build(&self, directories: &[PathBuf]) -> FileCollector {
        FileCollector::new(
            self.file_name,
            directories.to_vec(),
            self.parser(),
            self.counter_rule,
        )
    }
}

/// Register every built-in collector with its default state
pub fn register_defaults(registry: &mut CollectorRegistry) -> Result<(), RegistryError> {
    for definition in DEFINITIONS {
        registry.register(definition.file_name, definition.default_enabled, move |directories| {
            Ok(Arc::new(definition.build(directories)) as Arc<dyn Collector>)
        })?;
    }

    Ok(())
}
