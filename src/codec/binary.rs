//! Binary snapshot codec
//!
//! bincode payload behind a small checked header.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GateError, Result};

use super::SnapshotCodec;

/// Magic bytes identifying a gatekv snapshot
pub const MAGIC: &[u8; 4] = b"GKVS";

/// Current snapshot format version
pub const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + CRC (4) + PayloadLen (8) = 18 bytes
pub const HEADER_SIZE: usize = 18;

/// Compact binary codec (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl SnapshotCodec for BincodeCodec {
    const EXTENSION: &'static str = "gkv";

    fn encode<V: Serialize>(&self, entries: &BTreeMap<String, V>) -> Result<Vec<u8>> {
        let payload = bincode::serialize(entries)
            .map_err(|e| GateError::Serialization(e.to_string()))?;

        let crc = crc32fast::hash(&payload);

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&payload);

        Ok(out)
    }

    fn decode<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<BTreeMap<String, V>> {
        if bytes.len() < HEADER_SIZE {
            return Err(GateError::CorruptSnapshot(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC {
            return Err(GateError::CorruptSnapshot(format!(
                "Bad magic: {:02x?}",
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(GateError::CorruptSnapshot(format!(
                "Unsupported version: {} (expected {})",
                version, VERSION
            )));
        }

        let stored_crc = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[10..18]);
        let payload_len = u64::from_le_bytes(len_bytes);

        let payload = &bytes[HEADER_SIZE..];
        if payload.len() as u64 != payload_len {
            return Err(GateError::CorruptSnapshot(format!(
                "Payload length mismatch: header says {}, file has {}",
                payload_len,
                payload.len()
            )));
        }

        let crc = crc32fast::hash(payload);
        if crc != stored_crc {
            return Err(GateError::CorruptSnapshot(format!(
                "CRC mismatch: stored {:08x}, computed {:08x}",
                stored_crc, crc
            )));
        }

        bincode::deserialize(payload).map_err(|e| GateError::CorruptSnapshot(e.to_string()))
    }
}
