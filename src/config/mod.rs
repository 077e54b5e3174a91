//! Configuration types for cache synchronization.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for install passes and eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of resources fetched concurrently during an install pass.
    pub concurrent_fetches: usize,
    /// Per-fetch deadline in milliseconds; a timed-out fetch fails the pass.
    pub fetch_timeout_ms: u64,
    /// Whether to delete superseded blobs no generation references anymore.
    pub gc_unreferenced: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrent_fetches: 4,
            fetch_timeout_ms: 30_000,
            gc_unreferenced: true,
        }
    }
}

impl SyncConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent fetches.
    #[must_use]
    pub const fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent;
        self
    }

    /// Sets the per-fetch timeout in milliseconds.
    #[must_use]
    pub const fn with_fetch_timeout_ms(mut self, millis: u64) -> Self {
        self.fetch_timeout_ms = millis;
        self
    }

    /// Sets whether superseded, unreferenced blobs are deleted on activate.
    #[must_use]
    pub const fn with_gc_unreferenced(mut self, gc: bool) -> Self {
        self.gc_unreferenced = gc;
        self
    }

    /// Returns the per-fetch deadline as a [`Duration`].
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Path configuration for the blob cache and the generation record.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Directory where fingerprinted blobs are stored.
    pub cache_dir: PathBuf,
    /// File recording the manifest of the last activated generation.
    pub record_path: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("precache");

        Self {
            record_path: cache_dir.join("generation.toml"),
            cache_dir,
        }
    }
}

impl PathConfig {
    /// Creates a path configuration rooted at the given cache directory.
    #[must_use]
    pub fn rooted_at(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            record_path: cache_dir.join("generation.toml"),
            cache_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sync_config() {
        let config = SyncConfig::default();
        assert_eq!(config.concurrent_fetches, 4);
        assert_eq!(config.fetch_timeout_ms, 30_000);
        assert!(config.gc_unreferenced);
    }

    #[test]
    fn sync_config_builder_pattern() {
        let config = SyncConfig::new()
            .with_concurrent_fetches(8)
            .with_fetch_timeout_ms(500)
            .with_gc_unreferenced(false);

        assert_eq!(config.concurrent_fetches, 8);
        assert_eq!(config.fetch_timeout(), Duration::from_millis(500));
        assert!(!config.gc_unreferenced);
    }

    #[test]
    fn sync_config_serializes_to_toml() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.concurrent_fetches, config.concurrent_fetches);
        assert_eq!(deserialized.fetch_timeout_ms, config.fetch_timeout_ms);
        assert_eq!(deserialized.gc_unreferenced, config.gc_unreferenced);
    }

    #[test]
    fn default_path_config_lives_under_cache_dir() {
        let config = PathConfig::default();
        assert!(config.cache_dir.to_string_lossy().contains("precache"));
        assert!(config.record_path.ends_with("generation.toml"));
    }

    #[test]
    fn rooted_path_config() {
        let config = PathConfig::rooted_at("/tmp/assets");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/assets"));
        assert_eq!(
            config.record_path,
            PathBuf::from("/tmp/assets/generation.toml")
        );
    }
}
