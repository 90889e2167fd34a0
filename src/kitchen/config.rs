// src/kitchen/config.rs

//! Configuration types for the kitchen

use crate::config::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Parent of the package-private build directories
    pub build_root: PathBuf,
    /// Downloaded sources, keyed by checksum
    pub source_cache: PathBuf,
    /// Default per-step timeout
    pub timeout: Duration,
    /// Job count for packages that allow unlimited parallelism
    pub jobs: u32,
    /// Keep build directories after a successful build
    pub keep_builddir: bool,
    /// Download attempts per URL
    pub fetch_retries: u32,
    /// Base retry delay, multiplied by the attempt number
    pub retry_delay: Duration,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for KitchenConfig {
    fn from(config: &Config) -> Self {
        Self {
            build_root: config.build_dir.clone(),
            source_cache: config.cache_dir.clone(),
            timeout: Duration::from_secs(config.step_timeout_secs),
            jobs: config.jobs.max(1),
            keep_builddir: config.keep_build_dirs,
            fetch_retries: config.fetch_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl KitchenConfig {
    /// Timeout for a package, honoring a recipe override
    pub fn step_timeout(&self, override_secs: Option<u64>) -> Duration {
        override_secs.map(Duration::from_secs).unwrap_or(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = Config {
            jobs: 0,
            fetch_retries: 0,
            step_timeout_secs: 90,
            ..Config::rooted_at(std::path::Path::new("/tmp/f"))
        };
        let kitchen = KitchenConfig::from(&config);
        assert_eq!(kitchen.jobs, 1);
        assert_eq!(kitchen.fetch_retries, 1);
        assert_eq!(kitchen.build_root, PathBuf::from("/tmp/f/build"));
        assert_eq!(kitchen.step_timeout(None), Duration::from_secs(90));
        assert_eq!(kitchen.step_timeout(Some(5)), Duration::from_secs(5));
    }
}
