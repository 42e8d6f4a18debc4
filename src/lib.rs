//! # gatekv
//!
//! A small persistent key-value store with:
//! - Full-snapshot persistence, written through on every mutation
//! - Bounded concurrent readers (counting semaphore)
//! - Exclusive writers that drain every reader permit
//! - In-process (threads) or named-semaphore (processes) coordination
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncStore                             │
//! │              get / set / delete / keys                       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ key validated, then
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌──────────────┐          ┌──────────────────┐
//!   │ 1 permit     │          │ write lock +     │
//!   │ (reader)     │          │ all permits      │
//!   └──────┬───────┘          └────────┬─────────┘
//!          └────────────┬──────────────┘
//!                       ▼
//!              ┌─────────────────┐        ┌──────────────┐
//!              │ PersistentStore │◀──────▶│ SnapshotCodec│
//!              │ (BTreeMap)      │        └──────────────┘
//!              └────────┬────────┘
//!                       ▼
//!                 snapshot file
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use gatekv::{Config, KeyValueStore, SyncStore};
//!
//! let config = Config::builder()
//!     .snapshot_path("data/app.gkv")
//!     .read_capacity(2)
//!     .build();
//! let store: SyncStore<String> = SyncStore::open(config)?;
//!
//! assert!(store.set("testKey", "testValue".to_string()));
//! assert_eq!(store.get("testKey"), Some("testValue".to_string()));
//! # Ok::<(), gatekv::GateError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod key;

pub mod codec;
pub mod store;
pub mod coordinator;
pub mod accessor;
pub mod stress;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{GateError, Result};
pub use config::{Config, ConcurrencyMode, ReloadPolicy};
pub use codec::{BincodeCodec, JsonCodec, SnapshotCodec};
pub use store::{KeyValueStore, PersistentStore, StoreValue};
pub use coordinator::{AccessCoordinator, AccessState};
pub use accessor::SyncStore;
pub use stress::StressReport;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of gatekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
