// src/config.rs
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::{debug, warn};
use serde::Deserialize;

use crate::discovery::DEFAULT_CGROUP_GLOB;
use crate::error::{ExporterError, Result};
use crate::registry::{CollectorRegistry, RegistryError};

/// Prefix of environment variables overriding the configuration
pub const ENV_PREFIX: &str = "CGROUPV2_EXPORTER";

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path (TOML format)
    File(String),
    /// Environment variables with a prefix; `list_keys` hold comma-separated lists
    Environment {
        prefix: String,
        list_keys: Vec<String>,
    },
    /// Default configuration
    Defaults,
}

/// Load configuration from sources in order, later ones overriding earlier ones
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    warn!("Configuration file not found: {}", path.display());
                    continue;
                }

                debug!("Loading TOML configuration from file: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            ConfigSource::Environment { prefix, list_keys } => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                let mut env = config::Environment::with_prefix(&prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true);
                if !list_keys.is_empty() {
                    env = env.list_separator(",");
                    for key in list_keys {
                        env = env.with_list_parse_key(&key);
                    }
                }
                builder = builder.add_source(env);
            }
            ConfigSource::Defaults => {
                debug!("Using default configuration values");
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| ExporterError::Config(format!("Failed to build configuration: {}", e)))?;

    let result = config.try_deserialize().map_err(|e| {
        ExporterError::Config(format!("Failed to deserialize configuration: {}", e))
    })?;

    debug!("Configuration loaded successfully: {:?}", result);

    Ok(result)
}

/// Configuration builder
pub struct ConfigBuilder<T: for<'de> Deserialize<'de>> {
    sources: Vec<ConfigSource>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: for<'de> Deserialize<'de> + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: for<'de> Deserialize<'de> + Debug> ConfigBuilder<T> {
    /// Create a new config builder
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources
            .push(ConfigSource::File(path.as_ref().to_string_lossy().to_string()));
        self
    }

    /// Add environment variables
    pub fn add_env(mut self, prefix: impl Into<String>, list_keys: &[&str]) -> Self {
        self.sources.push(ConfigSource::Environment {
            prefix: prefix.into(),
            list_keys: list_keys.iter().map(|key| key.to_string()).collect(),
        });
        self
    }

    /// Use default values
    pub fn use_defaults(mut self) -> Self {
        self.sources.push(ConfigSource::Defaults);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<T> {
        load_config::<T>(self.sources)
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Exporter configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    /// Glob patterns naming the cgroup directories to track
    pub cgroup_globs: Vec<String>,
    /// Disable every collector not listed in `enable` or `disable`
    pub disable_defaults: bool,
    /// Collectors to enable explicitly
    pub enable: Vec<String>,
    /// Collectors to disable explicitly, wins over `enable`
    pub disable: Vec<String>,
    /// Scrapes allowed in flight at once, 0 for no limit
    pub max_requests: usize,
    /// Leave out the `process_*` metrics about the exporter itself
    pub disable_exporter_metrics: bool,
    /// Seconds between scrapes, 0 to scrape once and exit
    pub interval_secs: u64,
    /// Logging level
    pub log_level: LogLevel,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            cgroup_globs: vec![DEFAULT_CGROUP_GLOB.to_string()],
            disable_defaults: false,
            enable: Vec::new(),
            disable: Vec::new(),
            max_requests: 4,
            disable_exporter_metrics: false,
            interval_secs: 0,
            log_level: LogLevel::default(),
        }
    }
}

impl ExporterConfig {
    /// Load from an optional TOML file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::<Self>::new().use_defaults();
        if let Some(path) = path {
            builder = builder.add_file(path);
        }
        builder
            .add_env(ENV_PREFIX, &["cgroup_globs", "enable", "disable"])
            .build()
    }

    /// Apply the explicit overrides, then `disable_defaults`
    pub fn apply_to(&self, registry: &mut CollectorRegistry) -> std::result::Result<(), RegistryError> {
        for name in &self.enable {
            registry.set_enabled(name, true)?;
        }
        for name in &self.disable {
            registry.set_enabled(name, false)?;
        }
        if self.disable_defaults {
            registry.disable_all_unforced();
        }
        Ok(())
    }
}
