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


//! Cryptography and DRM removal
//!
//! This module removes the sample-level AES encryption of AAXC audiobooks.
//!
//! # Modules
//! - `keys`: 16-byte key/IV newtypes and tolerant hex decoding
//! - `cipher`: AES-128-CBC sample decryption with the IV restarted per sample
//! - `aaxc`: the streaming conversion engine
//!
//! # DRM Format
//! - **AAXC**: MP4 container, `ftyp` brand `aax `, audio sample entries
//!   tagged `aavd`. Every audio sample is AES-128-CBC encrypted on its own
//!   (whole blocks only). Everything outside the samples is in the clear.

pub mod aaxc;
pub mod cipher;
pub mod keys;

pub use aaxc::{AaxcDecrypter, ConversionSummary, ConversionTask};
pub use cipher::{SampleCipher, SampleDecryptor, BLOCK_SIZE};
pub use keys::{decode_hex, encode_hex, AesIv, AesKey};
