//! Parsers for cgroup v2 control files
//!
//! The kernel exposes cgroup statistics in a handful of ad-hoc text layouts.
//! Each parser here turns one layout into a flat list of [`MetricRecord`]s
//! that the file collector can label and publish without knowing anything
//! about the original format.

mod error;
mod formats;

use std::collections::BTreeMap;

pub use error::{ParseError, ParseResult};
pub use formats::{FlatKeyValueParser, NestedKeyValueParser, RangeListCountParser, SingleValueParser};

/// A single parsed sample: metric name, value and its own labels.
///
/// The `cgroup` label is added later by the collector, parsers only know
/// about labels they can derive from the file content.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

impl MetricRecord {
    /// Create a record without labels
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: BTreeMap::new(),
        }
    }

    /// Add a label to the record
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Trait for turning the raw content of a control file into metric records
pub trait Parser: Send + Sync + 'static {
    /// Parse the full content of one file
    fn parse(&self, raw: &[u8]) -> ParseResult<Vec<MetricRecord>>;
}
