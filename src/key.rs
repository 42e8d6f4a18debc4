//! Key validation
//!
//! Callers hand keys in as raw bytes (`&str`, `String`, `&[u8]`, ...).
//! Only valid UTF-8 is accepted as a key; anything else is rejected with
//! `InvalidKeyType` before any lock or file is touched.

use std::fmt;

use crate::error::{GateError, Result};

/// A validated string key borrowed from the caller's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key<'a>(&'a str);

impl<'a> Key<'a> {
    /// Validate raw key bytes
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        std::str::from_utf8(raw).map(Key).map_err(|e| {
            GateError::InvalidKeyType(format!(
                "expected a UTF-8 string, got {} bytes ({})",
                raw.len(),
                e
            ))
        })
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Render a raw key for log lines, valid or not
pub(crate) fn describe(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => format!("{:02x?}", raw),
    }
}
