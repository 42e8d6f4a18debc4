//! Store Module
//!
//! File-backed key-value mapping and the capability trait shared by every
//! layer that serves get/set/delete.
//!
//! ## Responsibilities
//! - Validate keys before anything else happens
//! - Keep the in-memory map consistent with the snapshot file
//! - Write every mutation through to disk before returning
//!
//! ## Failure Signaling
//! Every operation comes in two forms:
//! - `try_*` returns `Result` with the full `GateError` taxonomy
//! - the plain form returns `Option` / `bool`, logging the failure
//!
//! `delete` reports `true` only when a key was actually removed and the
//! removal persisted, mirroring `set`.

mod persistent;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{GateError, Result};
use crate::key;

pub use persistent::PersistentStore;

/// Payloads a store can hold. The store never looks inside them.
pub trait StoreValue: Serialize + DeserializeOwned + Clone {}

impl<T: Serialize + DeserializeOwned + Clone> StoreValue for T {}

/// The get/set/delete capability
pub trait KeyValueStore<V: StoreValue> {
    /// Look up a key. `Ok(None)` means absent.
    fn try_get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<V>>;

    /// Insert or overwrite a key, persisting before returning
    fn try_set<K: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()>;

    /// Remove a key. `Ok(false)` means it was not there.
    fn try_delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool>;

    /// All keys, sorted
    fn try_keys(&self) -> Result<Vec<String>>;

    /// Look up a key; `None` when absent, invalid, or on failure
    fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<V> {
        let raw = key.as_ref();
        match self.try_get(raw) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                warn!(key = %key::describe(raw), "Key not found for get");
                None
            }
            Err(e) => {
                report("get", raw, &e);
                None
            }
        }
    }

    /// Insert or overwrite a key; `false` if nothing was stored
    fn set<K: AsRef<[u8]>>(&self, key: K, value: V) -> bool {
        let raw = key.as_ref();
        match self.try_set(raw, value) {
            Ok(()) => true,
            Err(e) => {
                report("set", raw, &e);
                false
            }
        }
    }

    /// Remove a key; `true` only if it existed and the removal persisted
    fn delete<K: AsRef<[u8]>>(&self, key: K) -> bool {
        let raw = key.as_ref();
        match self.try_delete(raw) {
            Ok(true) => true,
            Ok(false) => {
                warn!(key = %key::describe(raw), "Key not found for delete");
                false
            }
            Err(e) => {
                report("delete", raw, &e);
                false
            }
        }
    }

    /// All keys, sorted; empty on failure
    fn keys(&self) -> Vec<String> {
        self.try_keys().unwrap_or_else(|e| {
            error!(error = %e, "Listing keys failed");
            Vec::new()
        })
    }
}

/// Log a failed operation at the level its error deserves
pub(crate) fn report(op: &str, raw_key: &[u8], err: &GateError) {
    if err.is_recoverable() {
        warn!(op = op, key = %key::describe(raw_key), "{}", err);
    } else {
        error!(op = op, key = %key::describe(raw_key), "Operation failed: {}", err);
    }
}
