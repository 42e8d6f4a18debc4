//! Configuration for gatekv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a gatekv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Backing snapshot file. Its extension must match the codec in use
    /// (`gkv` for the binary codec, `json` for the JSON codec).
    pub snapshot_path: PathBuf,

    /// When the in-memory map is re-read from the snapshot file
    pub reload_policy: ReloadPolicy,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Maximum number of concurrent readers (semaphore permits)
    pub read_capacity: usize,

    /// Which primitive class backs the coordinator
    pub mode: ConcurrencyMode,
}

/// Which primitives guard a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// In-process primitives; callers are threads sharing one store
    Threads,

    /// Named OS semaphores bound to the snapshot path; callers may be
    /// separate processes opening the same file
    Processes,
}

/// Reload strategy for the in-memory map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// Re-read the file on the first access after every write-through
    AfterWrite,

    /// Keep the map authoritative; re-read only when the file's length or
    /// modification time differs from what this store last saw
    OnChange,

    /// Re-read the file before every access
    Always,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("./gatekv_data/store.gkv"),
            reload_policy: ReloadPolicy::AfterWrite,
            read_capacity: 4,
            mode: ConcurrencyMode::Threads,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the snapshot file path
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_path = path.into();
        self
    }

    /// Set the reload policy
    pub fn reload_policy(mut self, policy: ReloadPolicy) -> Self {
        self.config.reload_policy = policy;
        self
    }

    /// Set the maximum number of concurrent readers
    pub fn read_capacity(mut self, capacity: usize) -> Self {
        self.config.read_capacity = capacity;
        self
    }

    /// Set the concurrency mode
    pub fn mode(mut self, mode: ConcurrencyMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
