//! Snapshot Codec Module
//!
//! Turns the whole key-value mapping into one byte blob and back.
//!
//! ## Responsibilities
//! - Encode the full mapping (no partial encodings)
//! - Reject anything that is not a valid prior encoding as `CorruptSnapshot`
//! - Name the file extension a snapshot in this format must carry
//!
//! ## Binary Snapshot Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (18 bytes)                                       │
//! │   Magic: "GKVS" (4) | Version: u16 (2)                  │
//! │   CRC32 of payload: u32 (4) | Payload length: u64 (8)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Payload (variable)                                      │
//! │   bincode(BTreeMap<String, V>)                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod binary;
mod json;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use binary::{BincodeCodec, HEADER_SIZE, MAGIC, VERSION};
pub use json::JsonCodec;

/// Encodes and decodes a complete snapshot of the store
///
/// Values are opaque to the store; any `serde` payload works.
pub trait SnapshotCodec: Send + Sync {
    /// File extension (without the dot) snapshot files must use
    const EXTENSION: &'static str;

    /// Serialize the entire mapping
    fn encode<V: Serialize>(&self, entries: &BTreeMap<String, V>) -> Result<Vec<u8>>;

    /// Deserialize a mapping previously produced by `encode`
    fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<BTreeMap<String, V>>;
}
