//! JSON snapshot codec
//!
//! Human-readable snapshots, handy for inspecting a store by eye.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GateError, Result};

use super::SnapshotCodec;

/// Pretty-printed JSON object keyed by entry key
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl SnapshotCodec for JsonCodec {
    const EXTENSION: &'static str = "json";

    fn encode<V: Serialize>(&self, entries: &BTreeMap<String, V>) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(entries).map_err(|e| GateError::Serialization(e.to_string()))
    }

    fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<BTreeMap<String, V>> {
        serde_json::from_slice(bytes).map_err(|e| GateError::CorruptSnapshot(e.to_string()))
    }
}
