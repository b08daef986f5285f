// LibriSync - Audible Library Sync for Mobile
// Copyright (C) 2025 Henning Berge
//
// This program is a Rust port of Libation (https://github.com/rmcrackan/Libation)
// Original work Copyright (C) Libation contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! AES key material
//!
//! # What is the key material?
//! - 16-byte AES-128 key and 16-byte IV issued per title with the AAXC license
//! - Usually handed over as 32-character hex strings
//! - Never logged or echoed back in error messages
//!
//! # Hex Format Rules
//! - Case-insensitive
//! - Whitespace anywhere in the string is ignored ("2b7e 1516 ...")
//! - Odd length or non-hex characters are rejected with `InvalidHex`
//! - The empty string decodes to zero bytes (and then fails the size check)

use crate::error::{AaxcError, Result};
use std::fmt;

/// Length of an AES-128 key and of a CBC IV
pub const KEY_LEN: usize = 16;

/// Decode a hex string, ignoring embedded whitespace
///
/// # Example
/// ```
/// use aaxc_core::crypto::keys::decode_hex;
///
/// assert_eq!(decode_hex("1C EB 00 DA").unwrap(), vec![0x1C, 0xEB, 0x00, 0xDA]);
/// assert!(decode_hex("abc").is_err());
/// assert!(decode_hex("").unwrap().is_empty());
/// ```
pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(compact)?)
}

/// Uppercase hex, no separators
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// AES-128 key
///
/// `Debug` is redacted so the key never ends up in logs.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AesKey([u8; KEY_LEN]);

impl AesKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// # Errors
    /// - InvalidKeySize if `bytes` is not exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AaxcError::InvalidKeySize(bytes.len()))?;
        Ok(Self(array))
    }

    /// Parse a key from hex
    ///
    /// # Errors
    /// - InvalidHex if the string is not hex
    /// - InvalidKeySize if it does not decode to 16 bytes
    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::from_slice(&decode_hex(hex)?)
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(<redacted>)")
    }
}

/// CBC initialization vector, restored at the start of every sample
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AesIv([u8; KEY_LEN]);

impl AesIv {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// # Errors
    /// - InvalidIvSize if `bytes` is not exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AaxcError::InvalidIvSize(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::from_slice(&decode_hex(hex)?)
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AesIv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesIv(<redacted>)")
    }
}
