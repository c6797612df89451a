//! Expansion of cgroup directory patterns

use std::collections::BTreeSet;
use std::path::PathBuf;

use log::{debug, error, warn};

/// Pattern used when none is configured
pub const DEFAULT_CGROUP_GLOB: &str = "/sys/fs/cgroup/*";

/// Expand glob patterns into the cgroup directories to track.
///
/// Only directories are kept. Results are sorted and deduplicated, so
/// overlapping patterns name each directory once.
pub fn discover_cgroups(patterns: &[String]) -> Vec<PathBuf> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                error!("Invalid cgroup pattern pattern={} err={}", pattern, e);
                continue;
            }
        };

        for entry in paths {
            match entry {
                Ok(path) if path.is_dir() => {
                    found.insert(path);
                }
                Ok(path) => debug!("Skipping non-directory path={}", path.display()),
                Err(e) => error!("Unreadable cgroup match pattern={} err={}", pattern, e),
            }
        }
    }

    if found.is_empty() {
        warn!("No cgroup directories matched patterns={:?}", patterns);
    }

    found.into_iter().collect()
}
