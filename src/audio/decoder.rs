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


//! Audio format detection
//!
//! # Supported Formats
//! - AAX / AAXC: encrypted MP4 (`ftyp` brand `aax `)
//! - M4B / M4A: unencrypted MP4
//! - MP3: MPEG Audio Layer 3
//!
//! # Format Detection Strategy
//! 1. Read the first 12 bytes
//! 2. MP4 container ("ftyp" at bytes 4-7): decide by major brand
//! 3. MP3: "ID3" tag or MPEG frame sync
//! 4. Otherwise fall back to the file extension
//!
//! The brand `aax ` is shared by AAX and AAXC; the extension breaks the tie,
//! defaulting to AAXC.

use crate::error::{AaxcError, Result};
use crate::mp4::atom::FourCC;
use crate::mp4::source::open_input_file;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Audio format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    /// AAX - encrypted with activation bytes (legacy)
    Aax,
    /// AAXC - encrypted with a per-title key and IV
    Aaxc,
    /// M4B - Unencrypted M4B audiobook
    M4b,
    /// M4A - Unencrypted AAC audio
    M4a,
    /// MP3 - MPEG Audio Layer 3
    Mp3,
    /// Unknown or unsupported format
    Unknown,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "aax" => Self::Aax,
            "aaxc" => Self::Aaxc,
            "m4b" => Self::M4b,
            "mp3" => Self::Mp3,
            "m4a" => Self::M4a,
            _ => Self::Unknown,
        }
    }

    /// Detect format from an `ftyp` major brand
    pub fn from_brand(brand: FourCC) -> Self {
        match &brand.0 {
            b"aax " => Self::Aaxc,
            b"M4B " => Self::M4b,
            b"M4A " | b"mp42" | b"isom" => Self::M4a,
            _ => Self::Unknown,
        }
    }

    /// Check if format is encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Aax | Self::Aaxc)
    }

    /// Get file extension for this format
    pub fn to_extension(&self) -> &'static str {
        match self {
            Self::Aax => "aax",
            Self::Aaxc => "aaxc",
            Self::M4b => "m4b",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Unknown => "bin",
        }
    }

    /// Check if format is an MP4 container
    pub fn is_mp4_container(&self) -> bool {
        matches!(self, Self::Aax | Self::Aaxc | Self::M4b | Self::M4a)
    }
}

pub struct AudioDecoder;

impl AudioDecoder {
    /// Detect the format of a file from its header, then its extension
    ///
    /// # Errors
    /// - FileNotFound if the path does not exist
    /// - IoError if the header cannot be read
    pub fn detect_format(path: &Path) -> Result<AudioFormat> {
        let mut file = open_input_file(path)?;
        let mut header = Vec::with_capacity(12);
        file.by_ref().take(12).read_to_end(&mut header)?;

        let extension = path
            .extension()
            .map(|ext| AudioFormat::from_extension(&ext.to_string_lossy()))
            .unwrap_or(AudioFormat::Unknown);

        Ok(match Self::detect_format_from_bytes(&header) {
            Ok(AudioFormat::Unknown) | Err(_) => extension,
            Ok(AudioFormat::Aaxc) if extension == AudioFormat::Aax => AudioFormat::Aax,
            Ok(format) => format,
        })
    }

    /// Detect format from byte header
    ///
    /// Magic bytes:
    /// - MP4: "ftyp" at bytes 4-7, major brand at bytes 8-11
    /// - MP3: 0xFF 0xE0 (MPEG frame sync) or "ID3" (ID3v2 tag)
    pub fn detect_format_from_bytes(bytes: &[u8]) -> Result<AudioFormat> {
        if bytes.len() < 12 {
            return Err(AaxcError::invalid_data("File too small to detect format"));
        }

        if &bytes[4..8] == b"ftyp" {
            return Ok(FourCC::from_slice(&bytes[8..12]).map_or(AudioFormat::Unknown, AudioFormat::from_brand));
        }

        if &bytes[0..3] == b"ID3" {
            return Ok(AudioFormat::Mp3);
        }

        // MP3 frame sync (11 bits set: 0xFF 0xE0-0xFF)
        if bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
            return Ok(AudioFormat::Mp3);
        }

        Ok(AudioFormat::Unknown)
    }
}
