use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::Semaphore;

use crate::collector::AggregateCollector;
use crate::error::{ExporterError, Result};
use crate::registry::CollectorRegistry;
use crate::VERSION;

/// Scrape settings
#[derive(Debug, Clone, Copy)]
pub struct ExporterOptions {
    /// Scrapes allowed in flight at once, 0 for no limit
    pub max_requests: usize,
    /// Also export `process_*` metrics about the exporter itself
    pub exporter_metrics: bool,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            max_requests: 4,
            exporter_metrics: true,
        }
    }
}

/// Turns a frozen collector registry into text exposition snapshots.
///
/// The unfiltered aggregate is resolved once up front. Filtered scrapes
/// resolve a subset on demand, reusing the same collector instances.
pub struct Exporter {
    registry: Arc<CollectorRegistry>,
    directories: Vec<PathBuf>,
    aggregate: AggregateCollector,
    requests: Option<Semaphore>,
    max_requests: usize,
    self_metrics: Registry,
}

impl Exporter {
    pub fn new(
        registry: Arc<CollectorRegistry>,
        directories: Vec<PathBuf>,
        options: ExporterOptions,
    ) -> Result<Self> {
        let aggregate = registry.resolve(&directories, &[])?;

        info!(
            "Enabled collectors count={} directories={}",
            aggregate.len(),
            directories.len()
        );
        for name in aggregate.names() {
            info!(" - {}", name);
        }

        let self_metrics = Registry::new();
        let info = GaugeVec::new(
            Opts::new(
                "build_info",
                "A metric with a constant '1' value labeled by the exporter version.",
            )
            .namespace("cgroupv2_exporter"),
            &["version"],
        )?;
        self_metrics.register(Box::new(info.clone()))?;
        info.with_label_values(&[VERSION]).set(1.0);

        if options.exporter_metrics {
            register_process_metrics(&self_metrics)?;
        }

        let requests = (options.max_requests > 0).then(|| Semaphore::new(options.max_requests));

        Ok(Self {
            registry,
            directories,
            aggregate,
            requests,
            max_requests: options.max_requests,
            self_metrics,
        })
    }

    /// Directories every collector reads from
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Collect every family for this scrape, sorted by name.
    ///
    /// With empty `filters` the prebuilt aggregate is used, otherwise only
    /// the named collectors run.
    pub async fn gather(&self, filters: &[String]) -> Result<Vec<MetricFamily>> {
        let mut families = if filters.is_empty() {
            self.aggregate.collect().await
        } else {
            debug!("Resolving filtered scrape collectors={:?}", filters);
            self.registry
                .resolve(&self.directories, filters)?
                .collect()
                .await
        };

        families.extend(self.self_metrics.gather());
        families.retain(|family| !family.get_metric().is_empty());
        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));

        Ok(families)
    }

    /// Run a scrape and render it in the Prometheus text format
    pub async fn scrape(&self, filters: &[String]) -> Result<String> {
        let _permit = match &self.requests {
            Some(requests) => Some(
                requests
                    .try_acquire()
                    .map_err(|_| ExporterError::Busy(self.max_requests))?,
            ),
            None => None,
        };

        let families = self.gather(filters).await?;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ExporterError::Encoding(e.to_string()))
    }
}

#[cfg(target_os = "linux")]
fn register_process_metrics(registry: &Registry) -> Result<()> {
    use prometheus::process_collector::ProcessCollector;

    registry.register(Box::new(ProcessCollector::for_self()))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn register_process_metrics(_registry: &Registry) -> Result<()> {
    debug!("Process metrics are only available on Linux");
    Ok(())
}
