//! cgroupv2-exporter binary
//!
//! Scrapes the tracked cgroup directories once, or periodically with
//! `--interval`, and writes the Prometheus text exposition to stdout or a file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::io::AsyncWriteExt;

use cgroupv2_exporter::VERSION;
use cgroupv2_exporter::collector::register_defaults;
use cgroupv2_exporter::config::{ExporterConfig, LogLevel};
use cgroupv2_exporter::discovery::discover_cgroups;
use cgroupv2_exporter::exporter::{Exporter, ExporterOptions};
use cgroupv2_exporter::registry::CollectorRegistry;
use cgroupv2_exporter::util::logging;

#[derive(Parser, Debug)]
#[command(name = "cgroupv2-exporter")]
#[command(about = "Prometheus exporter for cgroup v2 control files")]
#[command(version = VERSION)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Glob pattern of cgroup directories to track, may be repeated
    #[arg(long = "cgroup-glob", value_name = "PATTERN")]
    cgroup_globs: Vec<String>,

    /// Disable every collector not explicitly enabled
    #[arg(long)]
    collector_disable_defaults: bool,

    /// Enable a collector, may be repeated
    #[arg(long, value_name = "NAME")]
    enable: Vec<String>,

    /// Disable a collector, may be repeated
    #[arg(long, value_name = "NAME")]
    disable: Vec<String>,

    /// Only run these collectors in each scrape, may be repeated
    #[arg(long, value_name = "NAME")]
    collect: Vec<String>,

    /// Seconds between scrapes, 0 to scrape once and exit
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Write the exposition to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Scrapes allowed in flight at once, 0 for no limit
    #[arg(long)]
    max_requests: Option<usize>,

    /// Leave out the process metrics of the exporter itself
    #[arg(long)]
    disable_exporter_metrics: bool,

    /// Logging level
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Print every known collector and its state as JSON, then exit
    #[arg(long)]
    list_collectors: bool,
}

impl Cli {
    /// Command-line values win over the configuration file and environment
    fn merge_into(&self, config: &mut ExporterConfig) {
        if !self.cgroup_globs.is_empty() {
            config.cgroup_globs = self.cgroup_globs.clone();
        }
        config.disable_defaults |= self.collector_disable_defaults;
        config.disable_exporter_metrics |= self.disable_exporter_metrics;
        config.enable.extend(self.enable.iter().cloned());
        config.disable.extend(self.disable.iter().cloned());
        // A name enabled on the command line overrides a file-level disable
        config.disable.retain(|name| !self.enable.contains(name));

        if let Some(interval) = self.interval {
            config.interval_secs = interval;
        }
        if let Some(max_requests) = self.max_requests {
            config.max_requests = max_requests;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

async fn write_snapshot(
    exporter: &Exporter,
    filters: &[String],
    output: Option<&Path>,
) -> cgroupv2_exporter::error::Result<()> {
    let text = exporter.scrape(filters).await?;

    match output {
        Some(path) => tokio::fs::write(path, text).await?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(text.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ExporterConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.merge_into(&mut config);

    logging::init(config.log_level);
    info!("Starting cgroupv2-exporter version={}", VERSION);

    let mut registry = CollectorRegistry::new();
    register_defaults(&mut registry)?;
    config
        .apply_to(&mut registry)
        .context("Invalid collector override")?;

    if cli.list_collectors {
        println!("{}", serde_json::to_string_pretty(&registry.states())?);
        return Ok(());
    }

    let directories = discover_cgroups(&config.cgroup_globs);
    let exporter = Exporter::new(
        Arc::new(registry),
        directories,
        ExporterOptions {
            max_requests: config.max_requests,
            exporter_metrics: !config.disable_exporter_metrics,
        },
    )?;

    let output = cli.output.as_deref();

    if config.interval_secs == 0 {
        write_snapshot(&exporter, &cli.collect, output).await?;
        return Ok(());
    }

    info!("Scraping every {} seconds", config.interval_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match write_snapshot(&exporter, &cli.collect, output).await {
                    Ok(()) => {}
                    Err(e) if e.is_request_error() => {
                        return Err(e).context("Invalid --collect filter");
                    }
                    Err(e) => error!("Scrape failed err={}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Received ctrl-c, shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "cgroupv2-exporter",
            "--cgroup-glob",
            "/sys/fs/cgroup/system.slice/*",
            "--enable",
            "pids.max",
            "--disable",
            "io.stat",
            "--interval",
            "30",
            "--log-level",
            "debug",
            "--disable-exporter-metrics",
        ]);

        let mut config = ExporterConfig {
            disable: vec!["pids.max".to_string()],
            ..Default::default()
        };
        cli.merge_into(&mut config);

        assert_eq!(config.cgroup_globs, vec!["/sys/fs/cgroup/system.slice/*"]);
        assert_eq!(config.enable, vec!["pids.max"]);
        assert_eq!(config.disable, vec!["io.stat"]);
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.disable_exporter_metrics);
        assert_eq!(config.max_requests, 4);
    }

    #[test]
    fn test_cli_keeps_config_defaults() {
        let cli = Cli::parse_from(["cgroupv2-exporter"]);
        let mut config = ExporterConfig::default();
        cli.merge_into(&mut config);

        assert_eq!(config, ExporterConfig::default());
    }
}
