//! Core collector traits and types
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use log::trace;
use prometheus::proto::MetricFamily;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::parser::ParseError;

/// Namespace prefixed to every exported metric
pub const NAMESPACE: &str = "cgroupv2";

/// Label carrying the sanitized cgroup directory name
pub const CGROUP_LABEL: &str = "cgroup";

/// Errors that end a collector's update for the current scrape
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("collector returned no data")]
    NoData,

    #[error("metric error: {0}")]
    Metric(#[from] prometheus::Error),
}

impl CollectorError {
    /// Whether this is the "ran fine but produced nothing" outcome
    pub fn is_no_data(&self) -> bool {
        matches!(self, CollectorError::NoData)
    }
}

/// Destination for the metric families produced during a scrape
#[derive(Debug, Clone)]
pub struct MetricSink {
    tx: mpsc::UnboundedSender<MetricFamily>,
}

impl MetricSink {
    /// Create a sink and the receiver draining it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MetricFamily>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit metric families, dropping empty ones
    pub fn emit(&self, families: Vec<MetricFamily>) {
        for family in families {
            if family.get_metric().is_empty() {
                continue;
            }
            if self.tx.send(family).is_err() {
                trace!("Metric sink closed, dropping family");
                return;
            }
        }
    }
}

/// Whether a metric accumulates as a counter or is overwritten as a gauge.
///
/// `Label` rules can split records of one metric name across both kinds; the
/// file collector keeps whichever kind it saw first for a name and skips the
/// rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterRule {
    /// Every metric of the file is a cumulative total
    Always,
    /// Every metric of the file is a point-in-time value
    Never,
    /// Metrics whose name ends with the suffix are totals
    NameSuffix(&'static str),
    /// Records carrying `key=value`, such as `stat="total"`, are totals
    Label {
        key: &'static str,
        value: &'static str,
    },
}

impl CounterRule {
    pub fn is_counter(&self, metric_name: &str, labels: &BTreeMap<String, String>) -> bool {
        match self {
            CounterRule::Always => true,
            CounterRule::Never => false,
            CounterRule::NameSuffix(suffix) => metric_name.ends_with(suffix),
            CounterRule::Label { key, value } => {
                labels.get(*key).is_some_and(|found| found == value)
            }
        }
    }
}

/// Base trait for all collectors
#[async_trait::async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Gather fresh metrics and emit them to the sink
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError>;

    /// Get the collector name
    fn name(&self) -> &str;
}
