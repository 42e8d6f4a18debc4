//! Persistent store
//!
//! BTreeMap mirror of a snapshot file with write-through mutations.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::codec::{BincodeCodec, SnapshotCodec};
use crate::config::ReloadPolicy;
use crate::error::{GateError, Result};
use crate::key::Key;

use super::{KeyValueStore, StoreValue};

/// Files modified this recently may share an mtime with a same-length rewrite
const RACY_WINDOW: Duration = Duration::from_secs(2);

/// Identity of the snapshot file as last seen by this store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,

    /// CRC32 of the whole file
    checksum: u32,
}

impl Fingerprint {
    /// `meta` must be taken before `bytes` were read, or after they were written
    fn new(meta: &fs::Metadata, bytes: &[u8]) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            checksum: crc32fast::hash(bytes),
        }
    }

    /// Whether the file at `path` is still the one fingerprinted
    ///
    /// Length and mtime decide, except inside `RACY_WINDOW` of the recorded
    /// mtime (or with no mtime at all), where the contents are compared too.
    fn matches(&self, path: &Path) -> std::io::Result<bool> {
        let meta = fs::metadata(path)?;
        if meta.len() != self.len || meta.modified().ok() != self.modified {
            return Ok(false);
        }

        let racy = match self.modified {
            Some(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age < RACY_WINDOW)
                .unwrap_or(true),
            None => true,
        };
        if !racy {
            return Ok(true);
        }

        Ok(crc32fast::hash(&fs::read(path)?) == self.checksum)
    }
}

/// Mutable part of the store
struct StoreState<V> {
    /// Current mapping
    entries: BTreeMap<String, V>,

    /// The mapping must be re-read before the next access
    needs_reload: bool,

    /// File identity at the last load or save
    fingerprint: Option<Fingerprint>,
}

/// A key-value map backed by a full snapshot file
///
/// ## Concurrency:
/// - `state`: RwLock so admitted readers can share the map while a stale
///   map is reloaded under the write side
/// - Who may run at all is decided one level up by `SyncStore`; used on
///   its own this store is still memory-safe but writers and readers are
///   only ordered by the RwLock
pub struct PersistentStore<V, C = BincodeCodec> {
    /// Backing snapshot file
    path: PathBuf,

    /// Snapshot encoding
    codec: C,

    /// When to re-read the file
    policy: ReloadPolicy,

    /// Map + staleness tracking
    state: RwLock<StoreState<V>>,

    /// Number of snapshot loads (including the one at open)
    reloads: AtomicU64,

    /// Other handles write the same file; reload before every mutation
    shared_writes: bool,
}

impl<V: StoreValue> PersistentStore<V, BincodeCodec> {
    /// Open with the binary codec and the default reload policy
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, ReloadPolicy::AfterWrite, BincodeCodec)
    }
}

impl<V: StoreValue, C: SnapshotCodec> PersistentStore<V, C> {
    /// Open or create a store at `path`
    ///
    /// On open:
    /// 1. Check the file name carries the codec's extension
    /// 2. Create missing parent directories
    /// 3. Missing file → write an empty snapshot
    /// 4. Existing file → load it (corruption is fatal here)
    pub fn open(path: impl Into<PathBuf>, policy: ReloadPolicy, codec: C) -> Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            path,
            codec,
            policy,
            state: RwLock::new(StoreState {
                entries: BTreeMap::new(),
                needs_reload: true,
                fingerprint: None,
            }),
            reloads: AtomicU64::new(0),
            shared_writes: false,
        };

        {
            let mut state = store.state.write();
            if store.path.exists() {
                store.reload(&mut state)?;
                info!(path = %store.path.display(), entries = state.entries.len(), "Store initialized from file");
            } else {
                store.persist(&mut state)?;
                info!(path = %store.path.display(), "Store file created");
            }
        }

        Ok(store)
    }

    // =========================================================================
    // Core operations (key already validated)
    // =========================================================================

    pub(crate) fn read_entry(&self, key: Key<'_>) -> Result<Option<V>> {
        let value = self.read_with(|entries| entries.get(key.as_str()).cloned())?;
        if value.is_some() {
            debug!(key = %key, "Retrieved value");
        }
        Ok(value)
    }

    pub(crate) fn write_entry(&self, key: Key<'_>, value: V) -> Result<()> {
        let mut state = self.state.write();
        self.prepare_write(&mut state)?;

        let previous = state.entries.insert(key.as_str().to_string(), value);

        if let Err(e) = self.persist(&mut state) {
            // Memory must not run ahead of disk
            match previous {
                Some(old) => {
                    state.entries.insert(key.as_str().to_string(), old);
                }
                None => {
                    state.entries.remove(key.as_str());
                }
            }
            return Err(e);
        }

        info!(key = %key, "Set value");
        Ok(())
    }

    pub(crate) fn remove_entry(&self, key: Key<'_>) -> Result<bool> {
        let mut state = self.state.write();
        self.prepare_write(&mut state)?;

        let Some(old) = state.entries.remove(key.as_str()) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&mut state) {
            state.entries.insert(key.as_str().to_string(), old);
            return Err(e);
        }

        info!(key = %key, "Deleted value");
        Ok(true)
    }

    pub(crate) fn list_keys(&self) -> Result<Vec<String>> {
        self.read_with(|entries| entries.keys().cloned().collect())
    }

    /// Number of entries
    pub fn len(&self) -> Result<usize> {
        self.read_with(|entries| entries.len())
    }

    /// True when the store holds no entries
    pub fn is_empty(&self) -> Result<bool> {
        self.read_with(|entries| entries.is_empty())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload policy in effect
    pub fn reload_policy(&self) -> ReloadPolicy {
        self.policy
    }

    /// How many times the snapshot has been loaded from disk
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// The codec in use
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Whether every mutation re-reads the file first
    pub fn shares_writes(&self) -> bool {
        self.shared_writes
    }

    /// Re-read the file before every mutation, whatever the reload policy
    ///
    /// Needed when other handles (other processes) write the same file
    /// under a shared write lock: a mutation applied to a stale map would
    /// overwrite their entries.
    pub(crate) fn with_shared_writes(mut self, shared: bool) -> Self {
        self.shared_writes = shared;
        self
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// `<stem>.<ext>` where the stem ends in a word character
    fn validate_path(path: &Path) -> Result<()> {
        let extension_ok = path.extension().and_then(|e| e.to_str()) == Some(C::EXTENSION);

        let stem_ok = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.chars().last())
            .map(|c| c.is_alphanumeric() || c == '_')
            .unwrap_or(false);

        if extension_ok && stem_ok {
            Ok(())
        } else {
            Err(GateError::Config(format!(
                "snapshot file {} is not valid: expected <name>.{}",
                path.display(),
                C::EXTENSION
            )))
        }
    }

    /// Run `f` against a fresh map, reloading under the write lock if needed
    fn read_with<R>(&self, f: impl FnOnce(&BTreeMap<String, V>) -> R) -> Result<R> {
        if self.policy == ReloadPolicy::Always {
            // A private copy per reader; admitted readers never queue on `state`
            let (entries, _) = self.load()?;
            return Ok(f(&entries));
        }

        {
            let state = self.state.read();
            if !self.is_stale(&state) {
                return Ok(f(&state.entries));
            }
        }

        let mut state = self.state.write();
        self.refresh(&mut state)?;
        Ok(f(&state.entries))
    }

    fn is_stale(&self, state: &StoreState<V>) -> bool {
        if state.needs_reload {
            return true;
        }
        match self.policy {
            ReloadPolicy::AfterWrite => false,
            ReloadPolicy::Always => true,
            ReloadPolicy::OnChange => match state.fingerprint {
                // An unreadable file counts as changed; the reload surfaces the error
                Some(seen) => !seen.matches(&self.path).unwrap_or(false),
                None => true,
            },
        }
    }

    /// Bring the map up to date before a mutation. Caller holds the write side of `state`.
    fn prepare_write(&self, state: &mut StoreState<V>) -> Result<()> {
        if self.shared_writes {
            self.reload(state)
        } else {
            self.refresh(state)
        }
    }

    /// Reload if stale. Caller holds the write side of `state`.
    fn refresh(&self, state: &mut StoreState<V>) -> Result<()> {
        if self.is_stale(state) {
            self.reload(state)?;
        }
        Ok(())
    }

    fn reload(&self, state: &mut StoreState<V>) -> Result<()> {
        state.needs_reload = true;

        let (entries, fingerprint) = self.load()?;

        state.entries = entries;
        state.needs_reload = false;
        state.fingerprint = Some(fingerprint);

        debug!(path = %self.path.display(), entries = state.entries.len(), "Store loaded from file");
        Ok(())
    }

    /// Read and decode the snapshot file without touching `state`
    fn load(&self) -> Result<(BTreeMap<String, V>, Fingerprint)> {
        // Metadata before contents: a write racing the read only costs an extra reload
        let meta = fs::metadata(&self.path).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Snapshot file unavailable");
            e
        })?;

        let bytes = fs::read(&self.path).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Reading snapshot failed");
            e
        })?;

        let entries = self.codec.decode(&bytes).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Decoding snapshot failed");
            e
        })?;

        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok((entries, Fingerprint::new(&meta, &bytes)))
    }

    /// Write the whole map to disk: temp file, fsync, rename
    fn persist(&self, state: &mut StoreState<V>) -> Result<()> {
        let bytes = self.codec.encode(&state.entries)?;

        write_atomic(&self.path, &bytes).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Writing snapshot failed");
            e
        })?;

        state.fingerprint = fs::metadata(&self.path)
            .ok()
            .map(|meta| Fingerprint::new(&meta, &bytes));
        state.needs_reload = self.policy == ReloadPolicy::AfterWrite;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Store written to file");
        Ok(())
    }
}

impl<V: StoreValue, C: SnapshotCodec> KeyValueStore<V> for PersistentStore<V, C> {
    fn try_get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<V>> {
        let key = Key::parse(key.as_ref())?;
        self.read_entry(key)
    }

    fn try_set<K: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        let key = Key::parse(key.as_ref())?;
        self.write_entry(key, value)
    }

    fn try_delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        let key = Key::parse(key.as_ref())?;
        self.remove_entry(key)
    }

    fn try_keys(&self) -> Result<Vec<String>> {
        self.list_keys()
    }
}

/// Replace `path` with `bytes` so readers see the old or the new file, never a mix
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = temp_path(path);

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            warn!(path = %tmp_path.display(), error = %e, "Could not remove temp snapshot");
        }
    }
    result
}

/// "store.gkv" → "store.gkv.tmp"
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
