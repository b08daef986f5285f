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


//! Error types for the AAXC converter
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped the same way the conversion pipeline fails:
//!
//! ### Input contract (rejected before any I/O)
//! - Wrong key length → `InvalidKeySize`
//! - Wrong IV length → `InvalidIvSize`
//! - Malformed hex key material → `InvalidHex`
//! - Unusable options → `InvalidConfiguration`
//!
//! ### Container structure (the whole operation aborts)
//! - Box bounds outside the parent or the source → `InvalidAtomSize`
//! - `ftyp` brand is not the expected source brand → `NotSourceFormat`
//! - No `soun` track → `NoAudioTrack`
//!
//! ### Cipher backend (terminal, surfaced verbatim)
//! - `CryptorCreationFailed`, `DecryptionFailed`
//!
//! ### Sample bounds and I/O
//! - Short read of a sample range → `InvalidSampleOffset`
//! - Cannot open/create/read/write → `InvalidData`, `FileNotFound`, `IoError`
//!
//! Metadata sub-atom failures never surface here; the metadata pass records
//! them through the event sink and drops the field.

use thiserror::Error;

/// Result type alias using our AaxcError type
pub type Result<T> = std::result::Result<T, AaxcError>;

/// Main error type for the converter
#[derive(Error, Debug)]
pub enum AaxcError {
    // ===== Input Contract Errors =====

    /// Key is not exactly 16 bytes
    #[error("Invalid key size: expected 16 bytes, got {0}")]
    InvalidKeySize(usize),

    /// IV is not exactly 16 bytes
    #[error("Invalid IV size: expected 16 bytes, got {0}")]
    InvalidIvSize(usize),

    /// Hex string could not be decoded
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    /// Conversion options are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== Container Structure Errors =====

    /// Declared box bounds exceed the enclosing region
    #[error("Invalid atom size for '{box_type}' at offset {offset}: declared {size} bytes, {available} available")]
    InvalidAtomSize {
        box_type: String,
        offset: u64,
        size: u64,
        /// Bytes left in the parent region (or the source) at `offset`
        available: u64,
    },

    /// The `ftyp` major brand does not match the expected source brand
    #[error("Not an AAXC container: expected brand '{expected}', found '{found}'")]
    NotSourceFormat {
        expected: String,
        found: String,
    },

    /// No track with the `soun` handler
    #[error("No audio track found in container")]
    NoAudioTrack,

    // ===== Crypto Errors =====

    /// The cipher backend rejected the key material
    #[error("Failed to create cryptor: {0}")]
    CryptorCreationFailed(String),

    /// Generic decryption failure
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    // ===== Sample / File Errors =====

    /// A sample's byte range cannot be read in full from the source
    #[error("Invalid sample offset: sample {sample_index} at {offset} (+{size} bytes) exceeds source length {source_len}")]
    InvalidSampleOffset {
        sample_index: usize,
        offset: u64,
        size: u32,
        source_len: u64,
    },

    /// Unreadable or unwritable data (cannot open/create files, truncated tables)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Input file does not exist
    #[error("File not found: {0}")]
    FileNotFound(String),

    // ===== General Errors =====

    /// Conversion was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl From<hex::FromHexError> for AaxcError {
    fn from(err: hex::FromHexError) -> Self {
        AaxcError::InvalidHex(err.to_string())
    }
}

impl AaxcError {
    /// Create an InvalidAtomSize error for a box type tag
    pub fn invalid_atom_size(box_type: impl std::fmt::Display, offset: u64, size: u64, available: u64) -> Self {
        AaxcError::InvalidAtomSize {
            box_type: box_type.to_string(),
            offset,
            size,
            available,
        }
    }

    /// Create an InvalidData error with a message
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        AaxcError::InvalidData(message.into())
    }

    /// Create a DecryptionFailed error with a message
    pub fn decryption_failed<S: Into<String>>(message: S) -> Self {
        AaxcError::DecryptionFailed(message.into())
    }

    /// Check if error is related to DRM/crypto operations
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            AaxcError::InvalidKeySize(_)
                | AaxcError::InvalidIvSize(_)
                | AaxcError::CryptorCreationFailed(_)
                | AaxcError::DecryptionFailed(_)
        )
    }

    /// Check if error means the container itself cannot be trusted
    pub fn is_structural_error(&self) -> bool {
        matches!(
            self,
            AaxcError::InvalidAtomSize { .. }
                | AaxcError::NotSourceFormat { .. }
                | AaxcError::NoAudioTrack
                | AaxcError::InvalidSampleOffset { .. }
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            AaxcError::FileNotFound(_) | AaxcError::InvalidData(_) | AaxcError::IoError(_)
        )
    }

    /// Get user-friendly error message suitable for display
    ///
    /// Key material is never echoed back.
    pub fn user_message(&self) -> String {
        match self {
            AaxcError::InvalidKeySize(_) | AaxcError::InvalidIvSize(_) | AaxcError::InvalidHex(_) => {
                "The decryption key or IV is malformed. Both must be 32 hex characters.".to_string()
            }
            AaxcError::NotSourceFormat { .. } => {
                "This file is not an AAXC audiobook.".to_string()
            }
            AaxcError::NoAudioTrack => {
                "The audiobook does not contain an audio track.".to_string()
            }
            AaxcError::InvalidAtomSize { .. } | AaxcError::InvalidSampleOffset { .. } => {
                "The audiobook file is damaged or incomplete. Please download it again.".to_string()
            }
            AaxcError::Cancelled => "Conversion was cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(AaxcError::InvalidKeySize(8).is_crypto_error());
        assert!(AaxcError::NoAudioTrack.is_structural_error());
        assert!(!AaxcError::NoAudioTrack.is_crypto_error());
        assert!(AaxcError::FileNotFound("book.aaxc".to_string()).is_file_error());
    }

    #[test]
    fn test_invalid_atom_size_message() {
        let err = AaxcError::invalid_atom_size("moov", 32, 4096, 100);
        let message = err.to_string();
        assert!(message.contains("moov"));
        assert!(message.contains("4096"));
    }

    #[test]
    fn test_user_message_hides_key_material() {
        let err = AaxcError::InvalidHex("deadbeef zz".to_string());
        assert!(!err.user_message().contains("deadbeef"));
    }

    #[test]
    fn test_hex_error_conversion() {
        let err: AaxcError = hex::decode("abc").unwrap_err().into();
        assert!(matches!(err, AaxcError::InvalidHex(_)));
    }
}
