use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use prometheus::core::Collector as _;
use prometheus::{CounterVec, GaugeVec, Opts};
use tokio::sync::Mutex;

use super::core::{CGROUP_LABEL, Collector, CollectorError, CounterRule, MetricSink, NAMESPACE};
use crate::parser::{MetricRecord, Parser};
use crate::sanitize::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MetricKind {
    Counter,
    Gauge,
}

/// Exposition vectors created so far, keyed by sanitized metric name.
/// Entries are never evicted.
#[derive(Default)]
struct VectorCache {
    counters: BTreeMap<String, CounterVec>,
    gauges: BTreeMap<String, GaugeVec>,
}

impl VectorCache {
    fn observe(
        &mut self,
        file_name: &str,
        kind: MetricKind,
        name: &str,
        labels: &BTreeMap<String, String>,
        value: f64,
    ) -> prometheus::Result<()> {
        let label_names: Vec<&str> = labels.keys().map(String::as_str).collect();
        let label_values: HashMap<&str, &str> =
            labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        match kind {
            MetricKind::Counter => {
                if self.gauges.contains_key(name) {
                    return Err(prometheus::Error::Msg(format!(
                        "{} is already exported as a gauge",
                        name
                    )));
                }
                if !value.is_finite() || value < 0.0 {
                    return Err(prometheus::Error::Msg(format!(
                        "counter {} cannot be increased by {}",
                        name, value
                    )));
                }

                let vec = match self.counters.entry(name.to_string()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        entry.insert(CounterVec::new(opts(name, file_name), &label_names)?)
                    }
                };
                vec.get_metric_with(&label_values)?.inc_by(value);
            }
            MetricKind::Gauge => {
                if self.counters.contains_key(name) {
                    return Err(prometheus::Error::Msg(format!(
                        "{} is already exported as a counter",
                        name
                    )));
                }

                let vec = match self.gauges.entry(name.to_string()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        entry.insert(GaugeVec::new(opts(name, file_name), &label_names)?)
                    }
                };
                vec.get_metric_with(&label_values)?.set(value);
            }
        }

        Ok(())
    }

    fn emit(&self, kind: MetricKind, name: &str, sink: &MetricSink) {
        let families = match kind {
            MetricKind::Counter => self.counters.get(name).map(|v| v.collect()),
            MetricKind::Gauge => self.gauges.get(name).map(|v| v.collect()),
        };
        if let Some(families) = families {
            sink.emit(families);
        }
    }
}

fn opts(name: &str, file_name: &str) -> Opts {
    Opts::new(name, format!("metric {} from file {}", name, file_name)).namespace(NAMESPACE)
}

/// A collector reading one control file from every tracked cgroup directory.
///
/// Each directory contributes the same metrics, told apart by the `cgroup`
/// label. A failure in any directory fails the whole update.
pub struct FileCollector {
    file_name: String,
    directories: Vec<PathBuf>,
    parser: Box<dyn Parser>,
    counter_rule: CounterRule,
    vectors: Mutex<VectorCache>,
}

impl FileCollector {
    /// Create a new file collector
    pub fn new(
        file_name: impl Into<String>,
        directories: Vec<PathBuf>,
        parser: Box<dyn Parser>,
        counter_rule: CounterRule,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            directories,
            parser,
            counter_rule,
            vectors: Mutex::new(VectorCache::default()),
        }
    }

    /// Name of the file read under every directory
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Tracked cgroup directories, in collection order
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    async fn read(&self, dir: &Path) -> Result<Vec<MetricRecord>, CollectorError> {
        let path = dir.join(&self.file_name);

        let raw = tokio::fs::read(&path).await.map_err(|source| {
            error!(
                "Failed to open file file={} dir={} err={}",
                self.file_name,
                dir.display(),
                source
            );
            CollectorError::Read {
                path: path.clone(),
                source,
            }
        })?;

        self.parser.parse(&raw).map_err(|source| {
            error!(
                "Failed to parse file file={} dir={} err={}",
                self.file_name,
                dir.display(),
                source
            );
            CollectorError::Parse { path, source }
        })
    }
}

fn cgroup_name(dir: &Path) -> String {
    match dir.file_name() {
        Some(base) => sanitize(&base.to_string_lossy()),
        None => sanitize(&dir.to_string_lossy()),
    }
}

#[async_trait::async_trait]
impl Collector for FileCollector {
    async fn update(&self, sink: &MetricSink) -> Result<(), CollectorError> {
        let mut vectors = self.vectors.lock().await;
        let mut touched = BTreeSet::new();
        let mut produced = 0usize;

        for dir in &self.directories {
            let records = self.read(dir).await?;
            let cgroup = cgroup_name(dir);

            for record in records {
                let name = sanitize(&record.name);
                let kind = if self.counter_rule.is_counter(&name, &record.labels) {
                    MetricKind::Counter
                } else {
                    MetricKind::Gauge
                };

                let mut labels = record.labels;
                labels.insert(CGROUP_LABEL.to_string(), cgroup.clone());

                match vectors.observe(&self.file_name, kind, &name, &labels, record.value) {
                    Ok(()) => {
                        debug!(
                            "Collected metric file={} name={} value={} cgroup={}",
                            self.file_name, name, record.value, cgroup
                        );
                        touched.insert((kind, name));
                        produced += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Skipping metric file={} name={} dir={} err={}",
                            self.file_name,
                            name,
                            dir.display(),
                            e
                        );
                    }
                }
            }
        }

        for (kind, name) in &touched {
            vectors.emit(*kind, name, sink);
        }

        if produced == 0 {
            return Err(CollectorError::NoData);
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.file_name
    }
}
