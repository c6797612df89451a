use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error};
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tokio::task::JoinSet;

use super::core::{Collector, MetricSink, NAMESPACE};

/// Runs a set of collectors side by side and reports how each one did.
///
/// Besides the collected data every scrape yields
/// `cgroupv2_scrape_collector_duration_seconds` and
/// `cgroupv2_scrape_collector_success`, labeled by collector name. Both are
/// built fresh for each call to [`AggregateCollector::collect`], so scrapes
/// running at the same time never see each other's outcomes.
pub struct AggregateCollector {
    collectors: BTreeMap<String, Arc<dyn Collector>>,
}

/// How one collector fared in one scrape
#[derive(Debug, Clone, Copy)]
struct Outcome {
    duration: f64,
    success: f64,
}

impl AggregateCollector {
    /// Create an aggregate over the given collectors
    pub fn new(collectors: BTreeMap<String, Arc<dyn Collector>>) -> Self {
        Self { collectors }
    }

    /// Names of the aggregated collectors, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collectors.keys().map(String::as_str)
    }

    /// Get a collector by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(name)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Metric shapes are not declared up front.
    pub fn describe(&self) {}

    /// Run every collector concurrently and return everything they produced,
    /// followed by the per-collector instrumentation of this scrape.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let (sink, mut rx) = MetricSink::channel();
        let mut tasks = JoinSet::new();

        // A task that never reports back counts as a failure
        let mut outcomes: BTreeMap<&str, Outcome> = self
            .collectors
            .keys()
            .map(|name| {
                (
                    name.as_str(),
                    Outcome {
                        duration: 0.0,
                        success: 0.0,
                    },
                )
            })
            .collect();

        for (name, collector) in &self.collectors {
            let name = name.clone();
            let collector = Arc::clone(collector);
            let sink = sink.clone();

            tasks.spawn(async move {
                let outcome = execute(&name, collector.as_ref(), &sink).await;
                (name, outcome)
            });
        }
        drop(sink);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    if let Some(slot) = outcomes.get_mut(name.as_str()) {
                        *slot = outcome;
                    }
                }
                Err(e) => error!("Collector task failed err={}", e),
            }
        }

        let mut families = Vec::new();
        while let Some(family) = rx.recv().await {
            families.push(family);
        }

        match instrumentation(&outcomes) {
            Ok(scrape) => families.extend(scrape),
            Err(e) => error!("Failed to build scrape instrumentation err={}", e),
        }

        families
    }
}

fn instrumentation(outcomes: &BTreeMap<&str, Outcome>) -> prometheus::Result<Vec<MetricFamily>> {
    let duration = GaugeVec::new(
        Opts::new(
            "collector_duration_seconds",
            "cgroupv2_exporter: Duration of a collector scrape.",
        )
        .namespace(NAMESPACE)
        .subsystem("scrape"),
        &["collector"],
    )?;
    let success = GaugeVec::new(
        Opts::new(
            "collector_success",
            "cgroupv2_exporter: Whether a collector succeeded.",
        )
        .namespace(NAMESPACE)
        .subsystem("scrape"),
        &["collector"],
    )?;

    for (name, outcome) in outcomes {
        duration.with_label_values(&[*name]).set(outcome.duration);
        success.with_label_values(&[*name]).set(outcome.success);
    }

    Ok(duration
        .collect()
        .into_iter()
        .chain(success.collect())
        .filter(|family| !family.get_metric().is_empty())
        .collect())
}

async fn execute(name: &str, collector: &dyn Collector, sink: &MetricSink) -> Outcome {
    let begin = Instant::now();
    let result = collector.update(sink).await;
    let elapsed = begin.elapsed().as_secs_f64();

    let success = match result {
        Ok(()) => {
            debug!(
                "Collector succeeded collector={} duration_seconds={}",
                name, elapsed
            );
            1.0
        }
        Err(e) if e.is_no_data() => {
            debug!(
                "Collector returned no data collector={} duration_seconds={} err={}",
                name, elapsed, e
            );
            0.0
        }
        Err(e) => {
            error!(
                "Collector failed collector={} duration_seconds={} err={}",
                name, elapsed, e
            );
            0.0
        }
    };

    Outcome {
        duration: elapsed,
        success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorError, CounterRule, FileCollector};
    use crate::parser::SingleValueParser;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Empty;

    #[async_trait::async_trait]
    impl Collector for Empty {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            Err(CollectorError::NoData)
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    struct Panicking;

    /// Succeeds on its first update and has no data afterwards
    struct Flip(AtomicUsize);

    #[async_trait::async_trait]
    impl Collector for Flip {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            match self.0.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(()),
                _ => Err(CollectorError::NoData),
            }
        }

        fn name(&self) -> &str {
            "flip"
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl Collector for Slow {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[async_trait::async_trait]
    impl Collector for Panicking {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            panic!("collector bug");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn single(file: &str, dirs: &[PathBuf]) -> Arc<dyn Collector> {
        Arc::new(FileCollector::new(
            file,
            dirs.to_vec(),
            Box::new(SingleValueParser::new(file.replace('.', "_"))),
            CounterRule::Never,
        ))
    }

    fn instrumentation(families: &[MetricFamily], family: &str) -> BTreeMap<String, f64> {
        families
            .iter()
            .filter(|f| f.get_name() == family)
            .flat_map(|f| f.get_metric().iter())
            .map(|m| {
                (
                    m.get_label()[0].get_value().to_string(),
                    m.get_gauge().get_value(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("app.slice");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("memory.current"), "100").unwrap();
        fs::write(dir.join("pids.current"), "7").unwrap();
        fs::write(dir.join("pids.peak"), "9").unwrap();
        let dirs = vec![dir.clone()];

        let aggregate = AggregateCollector::new(BTreeMap::from([
            ("memory.current".to_string(), single("memory.current", &dirs)),
            ("pids.current".to_string(), single("pids.current", &dirs)),
            ("pids.peak".to_string(), single("pids.peak", &dirs)),
            ("empty".to_string(), Arc::new(Empty) as Arc<dyn Collector>),
        ]));

        let families = aggregate.collect().await;
        let success = instrumentation(&families, "cgroupv2_scrape_collector_success");
        assert_eq!(success["memory.current"], 1.0);
        assert_eq!(success["pids.current"], 1.0);
        assert_eq!(success["empty"], 0.0);

        // The source of one collector disappears between scrapes
        fs::remove_file(dir.join("pids.current")).unwrap();
        let families = aggregate.collect().await;

        let success = instrumentation(&families, "cgroupv2_scrape_collector_success");
        assert_eq!(success["memory.current"], 1.0);
        assert_eq!(success["pids.peak"], 1.0);
        assert_eq!(success["pids.current"], 0.0);

        let durations = instrumentation(&families, "cgroupv2_scrape_collector_duration_seconds");
        assert_eq!(durations.len(), 4);

        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"cgroupv2_memory_current"));
        assert!(names.contains(&"cgroupv2_pids_peak"));
        assert!(!names.contains(&"cgroupv2_pids_current"));
    }

    #[tokio::test]
    async fn test_panicking_collector_reports_failure() {
        let aggregate = AggregateCollector::new(BTreeMap::from([(
            "panicking".to_string(),
            Arc::new(Panicking) as Arc<dyn Collector>,
        )]));

        let families = aggregate.collect().await;
        let success = instrumentation(&families, "cgroupv2_scrape_collector_success");
        assert_eq!(success["panicking"], 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_scrapes_report_their_own_outcome() {
        let aggregate = AggregateCollector::new(BTreeMap::from([
            (
                "flip".to_string(),
                Arc::new(Flip(AtomicUsize::new(0))) as Arc<dyn Collector>,
            ),
            ("slow".to_string(), Arc::new(Slow) as Arc<dyn Collector>),
        ]));

        let (first, second) = tokio::join!(aggregate.collect(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            aggregate.collect().await
        });

        let first = instrumentation(&first, "cgroupv2_scrape_collector_success");
        let second = instrumentation(&second, "cgroupv2_scrape_collector_success");
        assert_eq!(first["flip"], 1.0);
        assert_eq!(first["slow"], 1.0);
        assert_eq!(second["flip"], 0.0);
        assert_eq!(second["slow"], 1.0);
    }

    #[tokio::test]
    async fn test_empty_aggregate() {
        let aggregate = AggregateCollector::new(BTreeMap::new());
        assert!(aggregate.is_empty());
        assert!(aggregate.collect().await.is_empty());
    }
}
