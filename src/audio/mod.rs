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


//! Audio format detection and metadata export
//!
//! # Module Organization
//!
//! ## decoder
//! Format detection for audiobook files:
//! - `AudioFormat` - AAX, AAXC, M4B, M4A, MP3
//! - `AudioDecoder` - detection from the `ftyp` brand, magic bytes or extension
//!
//! ## metadata
//! Export of parsed container metadata:
//! - `AudioMetadata` - title, authors, narrators, duration, bitrate, chapters
//! - `ChapterMarker` - chapter start/end/title
//! - Cue sheet generation

pub mod decoder;
pub mod metadata;

pub use decoder::{AudioDecoder, AudioFormat};
pub use metadata::{AudioMetadata, ChapterMarker};
