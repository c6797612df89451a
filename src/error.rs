// src/error.rs
use std::io;
use thiserror::Error;

use crate::registry::RegistryError;

/// Result type used across the exporter library
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Top-level error type for the cgroupv2 exporter
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Collector registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Metric error: {0}")]
    Metric(#[from] prometheus::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Too many scrapes in flight (limit {0})")]
    Busy(usize),
}

impl ExporterError {
    /// Whether the error was caused by the request rather than the exporter,
    /// i.e. a transport should answer it with a "bad request" status.
    pub fn is_request_error(&self) -> bool {
        matches!(self, ExporterError::Registry(RegistryError::UnknownCollector(_))
            | ExporterError::Registry(RegistryError::DisabledCollector(_)))
    }
}
