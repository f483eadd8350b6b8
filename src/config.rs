//! Loader configuration with environment overrides.

use tracing::warn;

use crate::decode::{TargetSize, DEFAULT_DISPLAY};
use crate::loader::OrderPolicy;

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 1;

/// Maximum number of worker threads.
pub const MAX_WORKERS: usize = 4;

/// Default memory budget the cache takes its share of, in megabytes.
const DEFAULT_MEMORY_MB: usize = 256;

/// Default cache share of the memory budget (one eighth).
pub const DEFAULT_CACHE_FRACTION_DENOMINATOR: usize = 8;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Convert a megabyte count to bytes, or `None` if it does not fit in `usize`.
pub fn megabytes_to_bytes(mb: usize) -> Option<usize> {
    mb.checked_mul(BYTES_PER_MB)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Number of decode workers, which is also the admission capacity.
    pub workers: usize,
    /// Order in which pending requests are dispatched.
    pub policy: OrderPolicy,
    /// Memory available to the process, in bytes.
    pub memory_budget_bytes: usize,
    /// The cache gets `memory_budget_bytes / cache_fraction_denominator`.
    pub cache_fraction_denominator: usize,
    /// Final fallback when a destination cannot report its size.
    pub display: TargetSize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            policy: OrderPolicy::Lifo,
            memory_budget_bytes: DEFAULT_MEMORY_MB * BYTES_PER_MB,
            cache_fraction_denominator: DEFAULT_CACHE_FRACTION_DENOMINATOR,
            display: DEFAULT_DISPLAY,
        }
    }
}

impl LoaderConfig {
    pub fn new(workers: usize, policy: OrderPolicy) -> Self {
        Self {
            workers,
            policy,
            ..Self::default()
        }
    }

    /// Defaults overridden by `IMGLOAD_WORKERS`, `IMGLOAD_POLICY` and `IMGLOAD_MEMORY_MB`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("IMGLOAD_WORKERS") {
            match value.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => self.workers = workers,
                _ => warn!(%value, "Ignoring invalid IMGLOAD_WORKERS"),
            }
        }
        if let Some(value) = lookup("IMGLOAD_POLICY") {
            match value.parse::<OrderPolicy>() {
                Ok(policy) => self.policy = policy,
                Err(e) => warn!(error = %e, "Ignoring invalid IMGLOAD_POLICY"),
            }
        }
        if let Some(value) = lookup("IMGLOAD_MEMORY_MB") {
            match value.trim().parse::<usize>().ok().filter(|mb| *mb > 0) {
                Some(mb) => match megabytes_to_bytes(mb) {
                    Some(bytes) => self.memory_budget_bytes = bytes,
                    None => warn!(mb, "Ignoring IMGLOAD_MEMORY_MB that overflows a byte count"),
                },
                None => warn!(%value, "Ignoring invalid IMGLOAD_MEMORY_MB"),
            }
        }
    }

    /// Worker count clamped to the supported range.
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }

    pub fn cache_capacity_bytes(&self) -> usize {
        self.memory_budget_bytes / self.cache_fraction_denominator.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overridden(vars: &[(&str, &str)]) -> LoaderConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = LoaderConfig::default();
        config.apply_overrides(|key| vars.get(key).cloned());
        config
    }

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.policy, OrderPolicy::Lifo);
        assert_eq!(config.cache_capacity_bytes(), 32 * 1024 * 1024);
    }

    #[test]
    fn test_worker_clamping() {
        assert_eq!(LoaderConfig::new(0, OrderPolicy::Fifo).effective_workers(), 1);
        assert_eq!(LoaderConfig::new(3, OrderPolicy::Fifo).effective_workers(), 3);
        assert_eq!(LoaderConfig::new(64, OrderPolicy::Fifo).effective_workers(), MAX_WORKERS);
    }

    #[test]
    fn test_env_overrides() {
        let config = overridden(&[
            ("IMGLOAD_WORKERS", "3"),
            ("IMGLOAD_POLICY", "fifo"),
            ("IMGLOAD_MEMORY_MB", "64"),
        ]);
        assert_eq!(config.workers, 3);
        assert_eq!(config.policy, OrderPolicy::Fifo);
        assert_eq!(config.cache_capacity_bytes(), 8 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let config = overridden(&[
            ("IMGLOAD_WORKERS", "zero"),
            ("IMGLOAD_POLICY", "sideways"),
            ("IMGLOAD_MEMORY_MB", "0"),
        ]);
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn test_oversized_memory_override_ignored() {
        let huge = usize::MAX.to_string();
        let config = overridden(&[("IMGLOAD_MEMORY_MB", huge.as_str())]);
        assert_eq!(config.memory_budget_bytes, LoaderConfig::default().memory_budget_bytes);

        assert_eq!(megabytes_to_bytes(2), Some(2 * 1024 * 1024));
        assert_eq!(megabytes_to_bytes(usize::MAX / 1024), None);
    }
}
