use log::{debug, warn};

use super::error::{ParseError, ParseResult};
use super::{MetricRecord, Parser};

/// Label used by flat key-value files for the key column
pub const STAT_LABEL: &str = "stat";

/// Most ids one range may cover. Wider ranges are skipped as malformed, so a
/// corrupt file cannot make one scrape allocate an unbounded number of records
const MAX_RANGE_SPAN: u64 = 1 << 16;

fn decode(raw: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(raw).map_err(ParseError::from)
}

/// A parser for files holding exactly one value, such as `memory.current`
/// or `pids.max`. The literal `max` is reported as `+Inf`.
#[derive(Debug, Clone)]
pub struct SingleValueParser {
    metric_prefix: String,
}

impl SingleValueParser {
    /// Create a new single value parser
    pub fn new(metric_prefix: impl Into<String>) -> Self {
        Self {
            metric_prefix: metric_prefix.into(),
        }
    }
}

impl Parser for SingleValueParser {
    fn parse(&self, raw: &[u8]) -> ParseResult<Vec<MetricRecord>> {
        let content = decode(raw)?.trim();

        let value = if content == "max" {
            debug!("Converting max to +Inf for {}", self.metric_prefix);
            f64::INFINITY
        } else {
            content.parse::<f64>().map_err(|source| {
                warn!("Failed to parse value for {}: {:?}", self.metric_prefix, content);
                ParseError::InvalidValue {
                    input: content.to_string(),
                    source,
                }
            })?
        };

        Ok(vec![MetricRecord::new(self.metric_prefix.clone(), value)])
    }
}

/// A parser for `key value` lines, such as `memory.stat` or `cpu.stat`.
///
/// Every line becomes one record named after the prefix, with the key moved
/// into the `stat` label.
#[derive(Debug, Clone)]
pub struct FlatKeyValueParser {
    metric_prefix: String,
}

impl FlatKeyValueParser {
    /// Create a new flat key-value parser
    pub fn new(metric_prefix: impl Into<String>) -> Self {
        Self {
            metric_prefix: metric_prefix.into(),
        }
    }
}

impl Parser for FlatKeyValueParser {
    fn parse(&self, raw: &[u8]) -> ParseResult<Vec<MetricRecord>> {
        let mut records = Vec::new();

        for line in decode(raw)?.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 {
                warn!(
                    "Skipping line in {}: expected 2 fields, got {}",
                    self.metric_prefix,
                    fields.len()
                );
                continue;
            }

            match fields[1].parse::<f64>() {
                Ok(value) => records.push(
                    MetricRecord::new(self.metric_prefix.clone(), value).with_label(STAT_LABEL, fields[0]),
                ),
                Err(e) => {
                    warn!("Failed to parse value of {} in {}: {}", fields[0], self.metric_prefix, e);
                }
            }
        }

        Ok(records)
    }
}

/// A parser for lines of `id key=value key=value ...`, used by the pressure
/// stall files (`some`/`full`) and `io.stat` (`major:minor`).
#[derive(Debug, Clone)]
pub struct NestedKeyValueParser {
    metric_prefix: String,
    label: String,
}

impl NestedKeyValueParser {
    /// Create a parser whose label name is inferred from the prefix:
    /// `type` for pressure files, `device` for everything else.
    pub fn new(metric_prefix: impl Into<String>) -> Self {
        let metric_prefix = metric_prefix.into();
        let label = if metric_prefix.contains("pressure") {
            "type"
        } else {
            "device"
        };

        Self {
            metric_prefix,
            label: label.to_string(),
        }
    }

    /// Use an explicit label name for the leading identifier
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label name the leading identifier is published under
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Parser for NestedKeyValueParser {
    fn parse(&self, raw: &[u8]) -> ParseResult<Vec<MetricRecord>> {
        let mut records = Vec::new();

        for line in decode(raw)?.lines() {
            let mut fields = line.split_whitespace();
            let Some(id) = fields.next() else {
                continue;
            };

            let pairs: Vec<&str> = fields.collect();
            if pairs.is_empty() {
                warn!(
                    "Skipping line in {}: expected at least 2 fields, got 1",
                    self.metric_prefix
                );
                continue;
            }

            for pair in pairs {
                let Some((key, value)) = pair.split_once('=') else {
                    warn!("Failed to parse key-value pair in {}: {:?}", self.metric_prefix, pair);
                    continue;
                };
                if key.is_empty() || value.contains('=') {
                    warn!("Failed to parse key-value pair in {}: {:?}", self.metric_prefix, pair);
                    continue;
                }

                match value.parse::<f64>() {
                    Ok(value) => records.push(
                        MetricRecord::new(format!("{}_{}", self.metric_prefix, key), value)
                            .with_label(self.label.as_str(), id),
                    ),
                    Err(e) => {
                        warn!("Failed to parse value of {} in {}: {}", key, self.metric_prefix, e);
                    }
                }
            }
        }

        Ok(records)
    }
}

/// A parser for range lists such as `0-3,8,10-11`, used by the cpuset files.
///
/// Each listed CPU or memory node becomes its own record with value `1`.
#[derive(Debug, Clone)]
pub struct RangeListCountParser {
    metric_prefix: String,
    label: String,
}

impl RangeListCountParser {
    /// Create a parser whose label name is inferred from the prefix:
    /// `numanode` for memory node sets, `cpucore` for everything else.
    pub fn new(metric_prefix: impl Into<String>) -> Self {
        let metric_prefix = metric_prefix.into();
        let label = if metric_prefix.contains("mems") {
            "numanode"
        } else {
            "cpucore"
        };

        Self {
            metric_prefix,
            label: label.to_string(),
        }
    }

    /// Use an explicit label name for the listed ids
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Label name each listed id is published under
    pub fn label(&self) -> &str {
        &self.label
    }

    fn record(&self, id: u64) -> MetricRecord {
        MetricRecord::new(self.metric_prefix.clone(), 1.0).with_label(self.label.as_str(), id.to_string())
    }

    fn expand(&self, token: &str, records: &mut Vec<MetricRecord>) {
        let Some((start, end)) = token.split_once('-') else {
            match token.parse::<u64>() {
                Ok(id) => records.push(self.record(id)),
                Err(e) => warn!("Invalid value in {}: {:?}: {}", self.metric_prefix, token, e),
            }
            return;
        };

        let bounds = (start.trim().parse::<u64>(), end.trim().parse::<u64>());
        let (start, end) = match bounds {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Invalid range in {}: {:?}: {}", self.metric_prefix, token, e);
                return;
            }
        };

        if end < start || end - start >= MAX_RANGE_SPAN {
            warn!("Invalid range in {}: {:?}", self.metric_prefix, token);
            return;
        }

        records.extend((start..=end).map(|id| self.record(id)));
    }
}

impl Parser for RangeListCountParser {
    fn parse(&self, raw: &[u8]) -> ParseResult<Vec<MetricRecord>> {
        let mut records = Vec::new();

        for line in decode(raw)?.lines() {
            for token in line.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                self.expand(token, &mut records);
            }
        }

        Ok(records)
    }
}
