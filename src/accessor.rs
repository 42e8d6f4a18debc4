//! Synchronized Accessor
//!
//! The public face of gatekv: one `PersistentStore` plus the
//! `AccessCoordinator` that decides who may touch it.
//!
//! ## Responsibilities
//! - Reject invalid keys before anything blocks
//! - Admit up to `read_capacity` readers at once
//! - Give writers exclusivity by draining every reader permit
//! - Release permits and the write lock on every exit path

use std::path::Path;

use tracing::info;

use crate::codec::{BincodeCodec, SnapshotCodec};
use crate::config::{ConcurrencyMode, Config};
use crate::coordinator::AccessCoordinator;
use crate::error::Result;
use crate::key::Key;
use crate::store::{KeyValueStore, PersistentStore, StoreValue};

/// A persistent store shared by many threads (or processes)
///
/// ## Concurrency Model: Bounded Readers / Exclusive Writer
///
/// - **Reads** (get/keys): one semaphore permit each, at most
///   `read_capacity` at a time
/// - **Writes** (set/delete): write lock, then every permit; runs alone
///
/// A reader admitted before a writer finishes draining sees the old value;
/// every reader admitted after the writer releases sees the new one.
pub struct SyncStore<V, C = BincodeCodec> {
    /// The guarded store
    store: PersistentStore<V, C>,

    /// Permits + write lock
    coordinator: AccessCoordinator,
}

impl<V: StoreValue> SyncStore<V, BincodeCodec> {
    /// Open with the binary codec
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_codec(config, BincodeCodec)
    }

    /// Open with defaults and the given snapshot path (convenience method)
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().snapshot_path(path).build();
        Self::open(config)
    }
}

impl<V: StoreValue, C: SnapshotCodec> SyncStore<V, C> {
    /// Open or create the store described by `config`, encoding with `codec`
    ///
    /// On startup:
    /// 1. Open the persistent store (validates path, creates or loads file)
    /// 2. Build the coordinator for the configured mode and capacity
    ///
    /// In `Processes` mode every write re-reads the file under the shared
    /// write lock, so handles never overwrite each other's entries. Reads
    /// still follow the reload policy.
    pub fn open_with_codec(config: Config, codec: C) -> Result<Self> {
        let store = PersistentStore::open(config.snapshot_path.clone(), config.reload_policy, codec)?
            .with_shared_writes(config.mode == ConcurrencyMode::Processes);
        let coordinator =
            AccessCoordinator::new(config.mode, config.read_capacity, store.path())?;

        info!(
            path = %store.path().display(),
            mode = ?config.mode,
            read_capacity = config.read_capacity,
            "SyncStore initialized"
        );

        Ok(Self { store, coordinator })
    }

    /// Wrap an already-open store with an existing coordinator
    pub fn from_parts(store: PersistentStore<V, C>, coordinator: AccessCoordinator) -> Self {
        let shared = store.shares_writes() || coordinator.mode() == ConcurrencyMode::Processes;
        Self {
            store: store.with_shared_writes(shared),
            coordinator,
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// The guarded store
    ///
    /// Calls made directly on it bypass the coordinator.
    pub fn store(&self) -> &PersistentStore<V, C> {
        &self.store
    }

    pub fn coordinator(&self) -> &AccessCoordinator {
        &self.coordinator
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

impl<V: StoreValue, C: SnapshotCodec> KeyValueStore<V> for SyncStore<V, C> {
    fn try_get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<V>> {
        let key = Key::parse(key.as_ref())?;

        let _permit = self.coordinator.read()?;
        self.store.read_entry(key)
    }

    fn try_set<K: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        let key = Key::parse(key.as_ref())?;

        let _exclusive = self.coordinator.write()?;
        self.store.write_entry(key, value)
    }

    fn try_delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        let key = Key::parse(key.as_ref())?;

        let _exclusive = self.coordinator.write()?;
        self.store.remove_entry(key)
    }

    fn try_keys(&self) -> Result<Vec<String>> {
        let _permit = self.coordinator.read()?;
        self.store.list_keys()
    }
}
